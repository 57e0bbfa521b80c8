use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::protocol::Message;
use crate::vote::{ParticipantId, Vote, VoteSet};

/// The value a participant settled on, together with every participant whose vote was counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    vote: Vote,
    voters: Vec<ParticipantId>,
}

impl Outcome {
    pub fn new<T: Into<String>>(
        participant_id: ParticipantId,
        value: T,
        mut voters: Vec<ParticipantId>,
    ) -> Self {
        voters.sort_unstable();
        voters.dedup();

        Outcome {
            vote: Vote::new(participant_id, value),
            voters,
        }
    }

    /// resolve the outcome `participant_id` reaches with the votes it collected
    pub fn from_votes(participant_id: ParticipantId, votes: &VoteSet) -> Option<Self> {
        resolve(votes).map(|value| Outcome {
            vote: Vote::new(participant_id, value),
            voters: votes.participants(),
        })
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.vote.participant_id()
    }

    pub fn value(&self) -> &str {
        self.vote.value()
    }

    /// sorted, without duplicates
    pub fn voters(&self) -> &[ParticipantId] {
        &self.voters
    }

    pub fn to_message(&self) -> Message {
        Message::Outcome {
            value: self.value().to_string(),
            voters: self.voters.clone(),
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} by {:?}", self.value(), self.voters)
    }
}

/// Plurality over the collected votes. Ties go to the lexicographically smallest value.
pub fn resolve(votes: &VoteSet) -> Option<&str> {
    let mut tally = BTreeMap::<&str, usize>::new();

    for (_, value) in votes.iter() {
        *tally.entry(value).or_insert(0) += 1;
    }

    // the tally iterates in ascending value order, so the first maximum wins a tie
    let mut winner: Option<(&str, usize)> = None;
    for (value, count) in tally {
        match winner {
            Some((_, best)) if best >= count => {}
            _ => winner = Some((value, count)),
        }
    }

    winner.map(|(value, _)| value)
}

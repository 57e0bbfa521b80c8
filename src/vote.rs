use std::collections::btree_map::{self, BTreeMap};
use std::fmt::{Display, Formatter};

use rand::seq::SliceRandom;
use rand::Rng;

/// A participant is identified by the TCP port it listens on.
pub type ParticipantId = u16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vote {
    participant_id: ParticipantId,
    value: String,
}

impl Vote {
    pub fn new<T: Into<String>>(participant_id: ParticipantId, value: T) -> Self {
        Vote {
            participant_id,
            value: value.into(),
        }
    }

    /// pick one of `options` uniformly at random
    pub fn random<R: Rng + ?Sized>(
        participant_id: ParticipantId,
        options: &[String],
        rng: &mut R,
    ) -> Option<Self> {
        options
            .choose(rng)
            .map(|value| Vote::new(participant_id, value.as_str()))
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn value(&self) -> &str {
        self.value.as_str()
    }
}

impl Display for Vote {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, {}>", self.participant_id, self.value)
    }
}

/// Votes keyed by participant. The first vote seen for a participant is kept, any later one
/// for the same participant is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteSet {
    votes: BTreeMap<ParticipantId, String>,
}

impl VoteSet {
    pub fn new() -> Self {
        VoteSet::default()
    }

    /// returns false if a vote from the same participant is already present
    pub fn insert(&mut self, vote: Vote) -> bool {
        match self.votes.entry(vote.participant_id) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(vote.value);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.votes.contains_key(&participant_id)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// participants in ascending order
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.votes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticipantId, &str)> {
        self.votes
            .iter()
            .map(|(participant_id, value)| (*participant_id, value.as_str()))
    }

    pub fn to_votes(&self) -> Vec<Vote> {
        self.iter()
            .map(|(participant_id, value)| Vote::new(participant_id, value))
            .collect()
    }
}

impl Extend<Vote> for VoteSet {
    fn extend<I: IntoIterator<Item = Vote>>(&mut self, iter: I) {
        for vote in iter {
            let _ = self.insert(vote);
        }
    }
}

impl std::iter::FromIterator<Vote> for VoteSet {
    fn from_iter<I: IntoIterator<Item = Vote>>(iter: I) -> Self {
        let mut votes = VoteSet::new();
        votes.extend(iter);
        votes
    }
}

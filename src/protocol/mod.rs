
pub mod error;
pub mod parser;

use std::fmt::{Display, Formatter};

use crate::vote::{ParticipantId, Vote};
use error::ProtocolError;

pub use parser::MessageParser;

pub type Result = std::result::Result<Message, ProtocolError>;

pub const JOIN: &str = "JOIN";
pub const DETAILS: &str = "DETAILS";
pub const VOTE_OPTIONS: &str = "VOTE_OPTIONS";
pub const VOTE: &str = "VOTE";
pub const OUTCOME: &str = "OUTCOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Details,
    VoteOptions,
    Vote,
    Outcome,
}

impl MessageKind {
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Join => JOIN,
            MessageKind::Details => DETAILS,
            MessageKind::VoteOptions => VOTE_OPTIONS,
            MessageKind::Vote => VOTE,
            MessageKind::Outcome => OUTCOME,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            JOIN => Some(MessageKind::Join),
            DETAILS => Some(MessageKind::Details),
            VOTE_OPTIONS => Some(MessageKind::VoteOptions),
            VOTE => Some(MessageKind::Vote),
            OUTCOME => Some(MessageKind::Outcome),
            _ => None,
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One line of the wire protocol.
///
/// Values travel as single whitespace-free tokens, so vote options must not contain
/// whitespace (see [`crate::config::CoordinatorOptions::validate`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Join(ParticipantId),
    Details(Vec<ParticipantId>),
    VoteOptions(Vec<String>),
    Vote(Vec<Vote>),
    Outcome {
        value: String,
        voters: Vec<ParticipantId>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Join(_) => MessageKind::Join,
            Message::Details(_) => MessageKind::Details,
            Message::VoteOptions(_) => MessageKind::VoteOptions,
            Message::Vote(_) => MessageKind::Vote,
            Message::Outcome { .. } => MessageKind::Outcome,
        }
    }

    /// encode without the line terminator
    pub fn encode(&self) -> String {
        let mut tokens = vec![self.kind().tag().to_string()];

        match self {
            Message::Join(participant_id) => tokens.push(participant_id.to_string()),
            Message::Details(peers) => tokens.extend(peers.iter().map(|peer| peer.to_string())),
            Message::VoteOptions(options) => tokens.extend(options.iter().cloned()),
            Message::Vote(votes) => {
                for vote in votes {
                    tokens.push(vote.participant_id().to_string());
                    tokens.push(vote.value().to_string());
                }
            }
            Message::Outcome { value, voters } => {
                tokens.push(value.clone());
                tokens.extend(voters.iter().map(|voter| voter.to_string()));
            }
        }

        tokens.join(" ")
    }

    /// decode a line, failing unless it is of the `expected` kind
    pub fn decode(line: &str, expected: MessageKind) -> Result {
        MessageParser::parse(line, expected)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

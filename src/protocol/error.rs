use std::fmt::{Display, Formatter};
use std::num::ParseIntError;

use super::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorType {
    // Attempting to parse an empty line
    EmptyInput,
    // First token is not a known message tag
    UnknownKind(String),
    // First token is a known tag, but not the one the caller waits for
    UnexpectedKind {
        expected: MessageKind,
        found: MessageKind,
    },
    // Payload ends before a required token
    MissingToken,
    // Payload holds more tokens than the message allows
    TrailingToken(String),
    // A participant id is not a valid port number
    InvalidParticipant(ParseIntError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub(crate) err_type: ProtocolErrorType,
}

impl ProtocolError {
    pub(crate) fn empty_input() -> Self {
        Self {
            err_type: ProtocolErrorType::EmptyInput,
        }
    }

    pub(crate) fn unknown_kind(tag: &str) -> Self {
        Self {
            err_type: ProtocolErrorType::UnknownKind(tag.to_string()),
        }
    }

    pub(crate) fn unexpected_kind(expected: MessageKind, found: MessageKind) -> Self {
        Self {
            err_type: ProtocolErrorType::UnexpectedKind { expected, found },
        }
    }

    pub(crate) fn missing_token() -> Self {
        Self {
            err_type: ProtocolErrorType::MissingToken,
        }
    }

    pub(crate) fn trailing_token(token: &str) -> Self {
        Self {
            err_type: ProtocolErrorType::TrailingToken(token.to_string()),
        }
    }

    pub fn err_type(&self) -> &ProtocolErrorType {
        &self.err_type
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.err_type {
            ProtocolErrorType::EmptyInput => write!(f, "empty message"),
            ProtocolErrorType::UnknownKind(tag) => write!(f, "unknown message type {}", tag),
            ProtocolErrorType::UnexpectedKind { expected, found } => {
                write!(f, "expected {} message, got {}", expected, found)
            }
            ProtocolErrorType::MissingToken => write!(f, "message is missing a token"),
            ProtocolErrorType::TrailingToken(token) => {
                write!(f, "unexpected trailing token {}", token)
            }
            ProtocolErrorType::InvalidParticipant(err) => {
                write!(f, "invalid participant id: {}", err)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ParseIntError> for ProtocolError {
    fn from(err: ParseIntError) -> Self {
        Self {
            err_type: ProtocolErrorType::InvalidParticipant(err),
        }
    }
}

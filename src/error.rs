use std::fmt::{Display, Formatter};
use std::io;

use rayon::ThreadPoolBuildError;

use crate::protocol::error::ProtocolError;

/// Failures that stop a participant or a coordinator. Anything that only concerns a single
/// peer is contained by the election and never surfaces here.
#[derive(Debug)]
pub enum ElectionError {
    // Could not listen on our own port
    Bind(io::Error),
    // Could not reach the coordinator, or lost it before the election could start
    Coordinator(io::Error),
    // The coordinator sent something we cannot use
    Protocol(ProtocolError),
    ThreadPool(ThreadPoolBuildError),
    NoVoteOptions,
}

impl Display for ElectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "cannot listen on own port: {}", err),
            Self::Coordinator(err) => write!(f, "coordinator unreachable: {}", err),
            Self::Protocol(err) => write!(f, "{}", err),
            Self::ThreadPool(err) => write!(f, "{}", err),
            Self::NoVoteOptions => write!(f, "no vote options to choose from"),
        }
    }
}

impl std::error::Error for ElectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(err) | Self::Coordinator(err) => Some(err),
            Self::Protocol(err) => Some(err),
            Self::ThreadPool(err) => Some(err),
            Self::NoVoteOptions => None,
        }
    }
}

impl From<ProtocolError> for ElectionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<ThreadPoolBuildError> for ElectionError {
    fn from(err: ThreadPoolBuildError) -> Self {
        Self::ThreadPool(err)
    }
}

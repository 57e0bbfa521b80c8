#[cfg(test)]
#[macro_use]
extern crate serial_test;

pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod logger;
pub mod participant;
pub mod protocol;
pub mod vote;

pub use config::{ConfigError, CoordinatorOptions, ParticipantOptions};
pub use coordinator::{Coordinator, Report};
pub use election::{merge, resolve, Election, Outcome, PeerFailure, VoteResponse};
pub use error::ElectionError;
pub use logger::{EventLog, LoggerServer, UdpLoggerClient};
pub use participant::Participant;
pub use protocol::{Message, MessageKind};
pub use vote::{ParticipantId, Vote, VoteSet};

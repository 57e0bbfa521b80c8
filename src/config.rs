use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::vote::ParticipantId;

const DEFAULT_COORDINATOR_PORT: u16 = 12345;
const DEFAULT_LOGGER_PORT: u16 = 12344;
const DEFAULT_TIMEOUT_MILLIS: u64 = 500;

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    ZeroTimeout,
    NoParticipants,
    NoVoteOptions,
    // Vote options travel as single tokens on the wire
    InvalidVoteOption(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroTimeout => write!(f, "timeout must be greater than 0"),
            Self::NoParticipants => write!(f, "at least one participant is required"),
            Self::NoVoteOptions => write!(f, "at least one vote option is required"),
            Self::InvalidVoteOption(option) => {
                write!(f, "vote option {:?} must be a non-empty word", option)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct ParticipantOptions {
    /// `host:port` of the coordinator
    pub coordinator: String,
    pub logger_port: u16,
    pub port: ParticipantId,
    pub timeout: Duration,
}

impl ParticipantOptions {
    pub fn new<T: Into<String>>(
        coordinator: T,
        logger_port: u16,
        port: ParticipantId,
        timeout: Duration,
    ) -> Self {
        ParticipantOptions {
            coordinator: coordinator.into(),
            logger_port,
            port,
            timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.as_millis() == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }
}

impl Default for ParticipantOptions {
    fn default() -> Self {
        ParticipantOptions {
            coordinator: format!("127.0.0.1:{}", DEFAULT_COORDINATOR_PORT),
            logger_port: DEFAULT_LOGGER_PORT,
            port: DEFAULT_COORDINATOR_PORT + 1,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MILLIS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub port: u16,
    pub logger_port: u16,
    pub participants: usize,
    pub timeout: Duration,
    pub vote_options: Vec<String>,
}

impl CoordinatorOptions {
    pub fn new(
        port: u16,
        logger_port: u16,
        participants: usize,
        timeout: Duration,
        vote_options: Vec<String>,
    ) -> Self {
        CoordinatorOptions {
            port,
            logger_port,
            participants,
            timeout,
            vote_options,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.as_millis() == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        if self.participants == 0 {
            return Err(ConfigError::NoParticipants);
        }

        if self.vote_options.is_empty() {
            return Err(ConfigError::NoVoteOptions);
        }

        match self
            .vote_options
            .iter()
            .find(|option| option.is_empty() || option.contains(char::is_whitespace))
        {
            Some(option) => Err(ConfigError::InvalidVoteOption(option.clone())),
            None => Ok(()),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            port: DEFAULT_COORDINATOR_PORT,
            logger_port: DEFAULT_LOGGER_PORT,
            participants: 3,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MILLIS),
            vote_options: vec!["A".to_string(), "B".to_string()],
        }
    }
}

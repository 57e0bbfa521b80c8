#[cfg(test)]
mod tests;

use std::io::{self, BufReader, Write};
use std::net::TcpStream;

use crate::config::ParticipantOptions;
use crate::election::{read_message, Election, Outcome, PeerFailure};
use crate::error::ElectionError;
use crate::logger::EventLog;
use crate::protocol::error::ProtocolError;
use crate::protocol::{Message, MessageKind};
use crate::vote::{ParticipantId, Vote};

fn unexpected(expected: MessageKind, found: &Message) -> ElectionError {
    ElectionError::Protocol(ProtocolError::unexpected_kind(expected, found.kind()))
}

/// One process taking part in the election: joins the coordinator, votes, takes part in the
/// rounds and reports the outcome back.
pub struct Participant {
    options: ParticipantOptions,
    log: EventLog,
}

impl Participant {
    pub fn new(options: ParticipantOptions, log: EventLog) -> Self {
        Participant { options, log }
    }

    pub fn port(&self) -> ParticipantId {
        self.options.port
    }

    fn send(&self, link: &mut BufReader<TcpStream>, to: u16, message: &Message) -> io::Result<()> {
        let stream = link.get_mut();
        writeln!(stream, "{}", message.encode())?;
        stream.flush()?;

        self.log.message_sent(to, message);
        Ok(())
    }

    fn receive(
        &self,
        link: &mut BufReader<TcpStream>,
        from: u16,
        expected: MessageKind,
    ) -> Result<Message, ElectionError> {
        match read_message(link, expected) {
            Ok(message) => {
                self.log.message_received(from, &message);
                Ok(message)
            }
            Err(PeerFailure::Protocol(err)) => Err(ElectionError::Protocol(err)),
            Err(failure) => {
                self.log.participant_crashed(from, &failure);

                Err(ElectionError::Coordinator(match failure {
                    PeerFailure::Connect(err) | PeerFailure::Transport(err) => err,
                    _ => io::Error::new(io::ErrorKind::TimedOut, "coordinator timed out"),
                }))
            }
        }
    }

    /// Join, vote, hold the election and report the outcome. Losing the coordinator before
    /// the election starts is fatal, losing it afterwards only means the outcome is not
    /// reported.
    pub fn run(&self) -> Result<Outcome, ElectionError> {
        let timeout = self.options.timeout;

        let stream = TcpStream::connect(self.options.coordinator.as_str())
            .map_err(ElectionError::Coordinator)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(ElectionError::Coordinator)?;
        let coordinator = stream.peer_addr().map_err(ElectionError::Coordinator)?.port();
        self.log.connection_established(coordinator);

        let mut link = BufReader::new(stream);

        self.send(&mut link, coordinator, &Message::Join(self.options.port))
            .map_err(ElectionError::Coordinator)?;
        self.log.join_sent(&self.options.coordinator);

        let peers = match self.receive(&mut link, coordinator, MessageKind::Details)? {
            Message::Details(peers) => peers,
            other => return Err(unexpected(MessageKind::Details, &other)),
        };
        self.log.details_received(&peers);

        let options = match self.receive(&mut link, coordinator, MessageKind::VoteOptions)? {
            Message::VoteOptions(options) => options,
            other => return Err(unexpected(MessageKind::VoteOptions, &other)),
        };
        self.log.vote_options_received(&options);

        let vote = Vote::random(self.options.port, &options, &mut rand::thread_rng())
            .ok_or(ElectionError::NoVoteOptions)?;
        log::info!("[{}] voting for {}", self.options.port, vote.value());

        let outcome = Election::new(vote, peers, timeout, self.log.clone())?.hold();

        match self.send(&mut link, coordinator, &outcome.to_message()) {
            Ok(()) => self.log.outcome_notified(outcome.value(), outcome.voters()),
            Err(err) => self
                .log
                .participant_crashed(coordinator, PeerFailure::Transport(err)),
        }

        Ok(outcome)
    }
}

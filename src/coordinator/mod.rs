
use std::collections::BTreeMap;
use std::io::{self, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use rayon::ThreadPool;

use crate::config::CoordinatorOptions;
use crate::election::{read_message, Outcome, PeerFailure, GRACE_MILLIS};
use crate::error::ElectionError;
use crate::logger::EventLog;
use crate::protocol::error::ProtocolError;
use crate::protocol::{Message, MessageKind};
use crate::vote::ParticipantId;

type Link = BufReader<TcpStream>;

/// Outcomes reported back to the coordinator, in participant order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    outcomes: Vec<(ParticipantId, Outcome)>,
}

impl Report {
    pub fn outcomes(&self) -> &[(ParticipantId, Outcome)] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// the value every reporting participant settled on, if they all agree
    pub fn agreed_value(&self) -> Option<&str> {
        let (_, first) = self.outcomes.first()?;

        if self
            .outcomes
            .iter()
            .all(|(_, outcome)| outcome.value() == first.value())
        {
            Some(first.value())
        } else {
            None
        }
    }
}

fn send_message(link: &mut Link, message: &Message) -> io::Result<()> {
    let stream = link.get_mut();
    writeln!(stream, "{}", message.encode())?;
    stream.flush()
}

/// Hands out the participant list and the vote options, then waits for everybody's outcome.
pub struct Coordinator {
    options: CoordinatorOptions,
    listener: TcpListener,
    pool: ThreadPool,
    log: EventLog,
}

impl Coordinator {
    pub fn bind(options: CoordinatorOptions, log: EventLog) -> Result<Self, ElectionError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, options.port))
            .map_err(ElectionError::Bind)?;
        let port = listener.local_addr().map_err(ElectionError::Bind)?.port();
        log.started_listening(port);

        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("coordinator #{}", index))
            .num_threads(options.participants.max(1))
            .build()?;

        Ok(Coordinator {
            options,
            listener,
            pool,
            log,
        })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept every expected participant and read its JOIN. Connections that do not join in
    /// time are dropped.
    fn register(&self) -> BTreeMap<ParticipantId, Link> {
        let timeout = self.options.timeout;
        let (sender, receiver) =
            unbounded::<(SocketAddr, Result<(ParticipantId, Link), PeerFailure>)>();
        let mut accepted = 0;

        for _ in 0..self.options.participants {
            let (stream, remote) = match self.listener.accept() {
                Ok(connection) => connection,
                Err(err) => {
                    log::error!("cannot accept participant: {}", err);
                    continue;
                }
            };

            self.log.connection_accepted(remote);
            accepted += 1;

            let sender = sender.clone();
            let log = self.log.clone();

            self.pool.spawn(move || {
                let joined = stream
                    .set_read_timeout(Some(timeout))
                    .map_err(PeerFailure::Transport)
                    .and_then(|_| {
                        let mut link = BufReader::new(stream);
                        let message = read_message(&mut link, MessageKind::Join)?;
                        log.message_received(remote, &message);

                        match message {
                            Message::Join(participant_id) => Ok((participant_id, link)),
                            other => Err(PeerFailure::from(ProtocolError::unexpected_kind(
                                MessageKind::Join,
                                other.kind(),
                            ))),
                        }
                    });

                let _ = sender.send((remote, joined));
            });
        }

        drop(sender);

        let mut participants = BTreeMap::new();
        for (remote, joined) in receiver.iter().take(accepted) {
            match joined {
                Ok((participant_id, link)) if !participants.contains_key(&participant_id) => {
                    self.log.join_received(participant_id);
                    participants.insert(participant_id, link);
                }
                Ok((participant_id, _)) => {
                    log::warn!("{} joined twice, dropping {}", participant_id, remote);
                }
                Err(failure) => self.log.participant_crashed(remote, failure),
            }
        }

        participants
    }

    /// send DETAILS and VOTE_OPTIONS to everybody, forget those we cannot write to
    fn announce(&self, participants: &mut BTreeMap<ParticipantId, Link>) {
        let joined = participants.keys().copied().collect::<Vec<_>>();
        let vote_options = Message::VoteOptions(self.options.vote_options.clone());
        let mut unreachable = vec![];

        for (participant_id, link) in participants.iter_mut() {
            let others = joined
                .iter()
                .copied()
                .filter(|other| other != participant_id)
                .collect::<Vec<_>>();
            let details = Message::Details(others.clone());

            let sent = send_message(link, &details).and_then(|_| {
                self.log.message_sent(*participant_id, &details);
                self.log.details_sent(*participant_id, &others);

                send_message(link, &vote_options)
            });

            match sent {
                Ok(()) => {
                    self.log.message_sent(*participant_id, &vote_options);
                    self.log
                        .vote_options_sent(*participant_id, &self.options.vote_options);
                }
                Err(err) => {
                    self.log
                        .participant_crashed(*participant_id, PeerFailure::Transport(err));
                    unreachable.push(*participant_id);
                }
            }
        }

        for participant_id in unreachable {
            let _ = participants.remove(&participant_id);
        }
    }

    /// wait for the OUTCOME of every participant, at most one timeout per peer round plus two
    fn collect(&self, participants: BTreeMap<ParticipantId, Link>) -> Report {
        let wait = self.options.timeout * (participants.len() as u32 + 2);
        let deadline = Instant::now() + wait + Duration::from_millis(GRACE_MILLIS);
        let (sender, receiver) = unbounded::<(ParticipantId, Result<Message, PeerFailure>)>();
        let expected = participants.len();

        for (participant_id, mut link) in participants {
            let sender = sender.clone();

            self.pool.spawn(move || {
                let result = link
                    .get_ref()
                    .set_read_timeout(Some(wait))
                    .map_err(PeerFailure::Transport)
                    .and_then(|_| read_message(&mut link, MessageKind::Outcome));

                let _ = sender.send((participant_id, result));
            });
        }

        drop(sender);

        let mut outcomes = BTreeMap::new();
        let mut reported = 0;

        while reported < expected {
            let (participant_id, result) = match receiver.recv_deadline(deadline) {
                Ok(received) => received,
                Err(_) => break,
            };
            reported += 1;

            match result {
                Ok(message) => {
                    self.log.message_received(participant_id, &message);

                    if let Message::Outcome { value, voters } = message {
                        self.log.outcome_received(participant_id, &value);
                        let outcome = Outcome::new(participant_id, value, voters);
                        outcomes.insert(participant_id, outcome);
                    }
                }
                Err(failure) => self.log.participant_crashed(participant_id, failure),
            }
        }

        Report {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    /// Run one election from the first JOIN to the last OUTCOME.
    pub fn run(self) -> Report {
        let mut participants = self.register();
        self.announce(&mut participants);

        self.collect(participants)
    }
}

//! Participant side of the election.
//!
//! A participant connects to every peer ([`mesh`]), then runs one round per peer. In each
//! round it sends the votes it learned during the previous round to every peer it can still
//! reach and reads one line from every peer it can still hear. A peer that stays silent for a
//! whole round is considered crashed and is dropped for good. Once all rounds are done the
//! collected votes are resolved into an [`Outcome`].

#[cfg(test)]
mod tests;

pub(crate) mod mesh;
pub mod outcome;

use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crossbeam_channel::{tick, unbounded};
use rayon::ThreadPool;

use crate::error::ElectionError;
use crate::logger::EventLog;
use crate::protocol::error::ProtocolError;
use crate::protocol::{Message, MessageKind};
use crate::vote::{ParticipantId, Vote, VoteSet};
use mesh::{LinkKey, Mesh, MeshBuilder};

pub use outcome::{resolve, Outcome};

/// How long past the timeout the round driver still waits for a worker to report.
pub(crate) const GRACE_MILLIS: u64 = 100;

/// Why a single peer did not take part in an operation. Never fatal to the election.
#[derive(Debug)]
pub enum PeerFailure {
    // Nothing within the timeout
    Timeout,
    // Dialing the peer failed
    Connect(io::Error),
    // The connection broke or was closed
    Transport(io::Error),
    // The peer sent a line we cannot decode
    Protocol(ProtocolError),
}

impl Display for PeerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Connect(err) => write!(f, "connect failure: {}", err),
            Self::Transport(err) => write!(f, "transport failure: {}", err),
            Self::Protocol(err) => write!(f, "protocol error: {}", err),
        }
    }
}

impl From<io::Error> for PeerFailure {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Transport(err),
        }
    }
}

impl From<ProtocolError> for PeerFailure {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// What one peer said during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteResponse {
    peer: Option<ParticipantId>,
    votes: Vec<Vote>,
}

impl VoteResponse {
    pub fn new(peer: Option<ParticipantId>, votes: Vec<Vote>) -> Self {
        VoteResponse { peer, votes }
    }

    /// `None` while the peer has not announced itself yet
    pub fn peer(&self) -> Option<ParticipantId> {
        self.peer
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }
}

/// Fold one round of responses into `collected` and return the votes that were new, in
/// participant order. Within a round the first response carrying a participant wins.
pub fn merge(collected: &mut VoteSet, responses: &[VoteResponse]) -> Vec<Vote> {
    let mut new_votes = VoteSet::new();

    for vote in responses.iter().flat_map(|response| response.votes.iter()) {
        if !collected.contains(vote.participant_id()) {
            let _ = new_votes.insert(vote.clone());
        }
    }

    let new_votes = new_votes.to_votes();
    collected.extend(new_votes.iter().cloned());

    new_votes
}

enum Report {
    Sent(ParticipantId, TcpStream, Result<(), PeerFailure>),
    Polled(LinkKey, BufReader<TcpStream>, Result<Vec<Vote>, PeerFailure>),
}

fn send_line(stream: &mut TcpStream, line: &str) -> Result<(), PeerFailure> {
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.flush())
        .map_err(PeerFailure::Transport)
}

/// read one line off `link` and decode it as `expected`
pub(crate) fn read_message(
    link: &mut BufReader<TcpStream>,
    expected: MessageKind,
) -> Result<Message, PeerFailure> {
    let mut line = String::new();

    if link.read_line(&mut line)? == 0 {
        return Err(PeerFailure::Transport(io::Error::new(
            ErrorKind::UnexpectedEof,
            "connection closed",
        )));
    }

    Ok(Message::decode(&line, expected)?)
}

/// State of the round loop. Only the round driver touches it; workers get a link, do one
/// read or write, and hand the link back together with the result.
pub(crate) struct Gossip {
    own_id: ParticipantId,
    // ourselves and every configured peer, nobody else gets counted
    roster: BTreeSet<ParticipantId>,
    collected: VoteSet,
    new_votes: Vec<Vote>,
    mesh: Mesh,
    timeout: Duration,
    log: EventLog,
}

impl Gossip {
    pub(crate) fn new(
        vote: Vote,
        peers: &[ParticipantId],
        mesh: Mesh,
        timeout: Duration,
        log: EventLog,
    ) -> Self {
        let mut collected = VoteSet::new();
        let _ = collected.insert(vote.clone());

        let mut roster = peers.iter().copied().collect::<BTreeSet<_>>();
        roster.insert(vote.participant_id());

        Gossip {
            own_id: vote.participant_id(),
            roster,
            collected,
            new_votes: vec![vote],
            mesh,
            timeout,
            log,
        }
    }

    #[cfg(test)]
    pub(crate) fn collected(&self) -> &VoteSet {
        &self.collected
    }

    /// peers we still both send to and hear from
    pub(crate) fn live_peers(&self) -> Vec<ParticipantId> {
        let mut peers = self
            .mesh
            .inbound
            .keys()
            .filter_map(LinkKey::participant_id)
            .filter(|peer| self.mesh.outbound.contains_key(peer))
            .collect::<Vec<_>>();

        peers.sort_unstable();
        peers
    }

    #[cfg(test)]
    pub(crate) fn outbound_peers(&self) -> Vec<ParticipantId> {
        let mut peers = self.mesh.outbound.keys().copied().collect::<Vec<_>>();
        peers.sort_unstable();
        peers
    }

    #[cfg(test)]
    pub(crate) fn inbound_len(&self) -> usize {
        self.mesh.inbound.len()
    }

    /// Broadcast, collect, merge. Returns once every worker reported or the round deadline
    /// passed, whichever comes first.
    pub(crate) fn round(&mut self, round: usize, pool: &ThreadPool) {
        let message = Message::Vote(self.new_votes.clone());
        let line = format!("{}\n", message.encode());
        let (sender, receiver) = unbounded::<Report>();

        let mut sending = HashSet::new();
        for (peer, mut stream) in self.mesh.outbound.drain() {
            let sender = sender.clone();
            let line = line.clone();
            sending.insert(peer);

            pool.spawn(move || {
                let result = send_line(&mut stream, &line);
                let _ = sender.send(Report::Sent(peer, stream, result));
            });
        }

        let mut polling = HashSet::new();
        for (key, mut reader) in self.mesh.inbound.drain() {
            let sender = sender.clone();
            let log = self.log.clone();
            polling.insert(key);

            pool.spawn(move || {
                let result = read_message(&mut reader, MessageKind::Vote).and_then(|message| {
                    log.message_received(key, &message);

                    match message {
                        Message::Vote(votes) => Ok(votes),
                        other => Err(PeerFailure::from(ProtocolError::unexpected_kind(
                            MessageKind::Vote,
                            other.kind(),
                        ))),
                    }
                });
                let _ = sender.send(Report::Polled(key, reader, result));
            });
        }

        drop(sender);

        // fan in; a worker still busy past the deadline is abandoned along with its link
        let deadline = Instant::now() + self.timeout + Duration::from_millis(GRACE_MILLIS);
        let mut reports = vec![];
        while !sending.is_empty() || !polling.is_empty() {
            match receiver.recv_deadline(deadline) {
                Ok(report) => {
                    match &report {
                        Report::Sent(peer, _, _) => sending.remove(peer),
                        Report::Polled(key, _, _) => polling.remove(key),
                    };
                    reports.push(report);
                }
                Err(_) => break,
            }
        }

        let mut crashed = vec![];
        let mut unwritable = vec![];
        let mut responses = vec![];

        for report in reports {
            match report {
                Report::Sent(peer, stream, Ok(())) => {
                    self.log.message_sent(peer, &message);
                    self.log.votes_sent(peer, &self.new_votes);
                    self.mesh.outbound.insert(peer, stream);
                }
                Report::Sent(peer, _, Err(failure)) => unwritable.push((peer, failure)),
                Report::Polled(key, reader, Ok(mut votes)) => {
                    votes.retain(|vote| self.roster.contains(&vote.participant_id()));
                    let key = self.identify(round, key, &votes);
                    self.log.votes_received(key, &votes);
                    self.mesh.inbound.insert(key, reader);
                    responses.push((key, VoteResponse::new(key.participant_id(), votes)));
                }
                Report::Polled(key, _, Err(failure)) => crashed.push((key, failure)),
            }
        }

        unwritable.extend(sending.into_iter().map(|peer| (peer, PeerFailure::Timeout)));

        // a peer we cannot write to is as good as crashed, stop reading from it too
        for (peer, failure) in unwritable {
            self.log.participant_crashed(peer, failure);
            let _ = self.mesh.inbound.remove(&LinkKey::Peer(peer));
        }

        crashed.extend(polling.into_iter().map(|key| (key, PeerFailure::Timeout)));

        for (key, failure) in crashed {
            self.log.participant_crashed(key, failure);

            if let Some(peer) = key.participant_id() {
                // dropping the stream closes it
                let _ = self.mesh.outbound.remove(&peer);
            }
        }

        responses.sort_by_key(|(key, _)| *key);
        let responses = responses
            .into_iter()
            .map(|(_, response)| response)
            .collect::<Vec<_>>();

        self.new_votes = merge(&mut self.collected, &responses);

        if round == 1 {
            self.reconcile();
        }
    }

    /// In round 1 a pending link whose line holds exactly one vote belongs to that voter,
    /// provided the voter is one of our peers and not attributed yet.
    fn identify(&self, round: usize, key: LinkKey, votes: &[Vote]) -> LinkKey {
        match (round, key, votes) {
            (1, LinkKey::Pending(_), [vote]) => {
                let participant_id = vote.participant_id();
                let peer = LinkKey::Peer(participant_id);

                if participant_id == self.own_id
                    || !self.roster.contains(&participant_id)
                    || self.mesh.inbound.contains_key(&peer)
                {
                    key
                } else {
                    peer
                }
            }
            _ => key,
        }
    }

    /// Links that answered round 1 without announcing themselves stay pending and keep being
    /// polled. Only once every inbound link is attributed do we know for sure which outbound
    /// peers never reached us; those are closed.
    fn reconcile(&mut self) {
        if self
            .mesh
            .inbound
            .keys()
            .any(|key| key.participant_id().is_none())
        {
            return;
        }

        let silent = self
            .mesh
            .outbound
            .keys()
            .filter(|peer| !self.mesh.inbound.contains_key(&LinkKey::Peer(**peer)))
            .copied()
            .collect::<Vec<_>>();

        for peer in silent {
            self.log
                .participant_crashed(peer, "never heard from it in round 1");
            let _ = self.mesh.outbound.remove(&peer);
        }
    }

    pub(crate) fn into_outcome(self) -> Outcome {
        match Outcome::from_votes(self.own_id, &self.collected) {
            Some(outcome) => outcome,
            // our own vote is always collected
            None => Outcome::new(self.own_id, "", vec![self.own_id]),
        }
    }
}

/// One participant's run of the election, from building the mesh to the outcome.
pub struct Election {
    vote: Vote,
    peers: Vec<ParticipantId>,
    timeout: Duration,
    listener: TcpListener,
    pool: ThreadPool,
    log: EventLog,
}

impl Election {
    /// Binds our own port right away: failing to listen is the only fatal error of an
    /// election.
    pub fn new(
        vote: Vote,
        mut peers: Vec<ParticipantId>,
        timeout: Duration,
        log: EventLog,
    ) -> Result<Self, ElectionError> {
        let own_id = vote.participant_id();

        peers.retain(|peer| *peer != own_id);
        peers.sort_unstable();
        peers.dedup();

        let listener = mesh::bind(own_id)?;
        log.started_listening(own_id);

        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("election {}#{}", own_id, index))
            .num_threads((peers.len() * 2).max(1))
            .build()?;

        Ok(Election {
            vote,
            peers,
            timeout,
            listener,
            pool,
            log,
        })
    }

    pub fn peers(&self) -> &[ParticipantId] {
        &self.peers
    }

    /// Run every round and resolve the outcome. Peer failures only shrink the mesh, they
    /// never abort the election.
    pub fn hold(self) -> Outcome {
        let Election {
            vote,
            peers,
            timeout,
            listener,
            pool,
            log,
        } = self;

        let mesh = MeshBuilder::new(vote.participant_id(), &peers, timeout, &log)
            .build(listener, &pool);
        if !mesh.crashed.is_empty() {
            log::debug!("[{}] unreachable peers: {:?}", log.process_id(), mesh.crashed);
        }

        let rounds = peers.len();
        let mut gossip = Gossip::new(vote, &peers, mesh, timeout, log.clone());
        let pacing = tick(timeout);

        for round in 1..=rounds {
            log.begin_round(round);
            gossip.round(round, &pool);
            log.end_round(round);
            log::debug!(
                "[{}] still connected to {:?}",
                log.process_id(),
                gossip.live_peers()
            );

            if round < rounds {
                let _ = pacing.recv();
            }
        }

        let outcome = gossip.into_outcome();
        log.outcome_decided(outcome.value(), outcome.voters());

        outcome
    }
}

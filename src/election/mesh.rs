use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::{BufReader, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use rayon::ThreadPool;
use uuid::Uuid;

use super::{PeerFailure, GRACE_MILLIS};
use crate::error::ElectionError;
use crate::logger::EventLog;
use crate::vote::ParticipantId;

const POLL_INTERVAL_MILLIS: u64 = 10;

/// Key of an inbound link. An accepted connection does not tell which participant dialed it,
/// so it stays `Pending` until the peer announces itself with its first vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum LinkKey {
    Peer(ParticipantId),
    Pending(Uuid),
}

impl LinkKey {
    pub(crate) fn pending() -> Self {
        LinkKey::Pending(Uuid::new_v4())
    }

    pub(crate) fn participant_id(&self) -> Option<ParticipantId> {
        match self {
            LinkKey::Peer(participant_id) => Some(*participant_id),
            LinkKey::Pending(_) => None,
        }
    }
}

impl Display for LinkKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKey::Peer(participant_id) => write!(f, "{}", participant_id),
            LinkKey::Pending(token) => write!(f, "unidentified peer {}", token),
        }
    }
}

pub(crate) type Outbound = HashMap<ParticipantId, TcpStream>;
pub(crate) type Inbound = HashMap<LinkKey, BufReader<TcpStream>>;

/// Connections of one participant to its peers: one stream we write to per peer and one we
/// read from.
#[derive(Default)]
pub(crate) struct Mesh {
    pub outbound: Outbound,
    pub inbound: Inbound,
    /// peers we could not dial before the deadline
    pub crashed: Vec<ParticipantId>,
}

enum Connection {
    Dialed(ParticipantId, Result<TcpStream, PeerFailure>),
    Accepted(Result<(TcpStream, SocketAddr), PeerFailure>),
}

pub(crate) fn bind(own_id: ParticipantId) -> Result<TcpListener, ElectionError> {
    let listener =
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, own_id)).map_err(ElectionError::Bind)?;
    listener.set_nonblocking(true).map_err(ElectionError::Bind)?;

    Ok(listener)
}

fn configure(stream: &TcpStream, timeout: Duration) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

/// keep dialing `peer` until it accepts or `deadline` passes
fn dial(peer: ParticipantId, deadline: Instant, timeout: Duration) -> Result<TcpStream, PeerFailure> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, peer));

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(PeerFailure::Timeout);
        }

        match TcpStream::connect_timeout(&addr, deadline - now) {
            Ok(stream) => {
                configure(&stream, timeout).map_err(PeerFailure::Connect)?;
                return Ok(stream);
            }
            Err(err) if Instant::now() + Duration::from_millis(POLL_INTERVAL_MILLIS) < deadline => {
                if err.kind() != ErrorKind::ConnectionRefused {
                    log::debug!("dialing {} failed: {}", peer, err);
                }

                thread::sleep(Duration::from_millis(POLL_INTERVAL_MILLIS));
            }
            Err(err) => return Err(PeerFailure::Connect(err)),
        }
    }
}

/// wait for one incoming connection until `deadline` passes
fn accept(
    listener: &TcpListener,
    deadline: Instant,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), PeerFailure> {
    loop {
        match listener.accept() {
            Ok((stream, remote)) => {
                configure(&stream, timeout).map_err(PeerFailure::Transport)?;
                return Ok((stream, remote));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(PeerFailure::Timeout);
                }

                thread::sleep(Duration::from_millis(POLL_INTERVAL_MILLIS));
            }
            Err(err) => return Err(PeerFailure::Transport(err)),
        }
    }
}

pub(crate) struct MeshBuilder<'a> {
    own_id: ParticipantId,
    peers: &'a [ParticipantId],
    timeout: Duration,
    log: &'a EventLog,
}

impl<'a> MeshBuilder<'a> {
    pub(crate) fn new(
        own_id: ParticipantId,
        peers: &'a [ParticipantId],
        timeout: Duration,
        log: &'a EventLog,
    ) -> Self {
        MeshBuilder {
            own_id,
            peers,
            timeout,
            log,
        }
    }

    /// Dial every peer and accept one connection per peer, all at once, within one timeout.
    pub(crate) fn build(self, listener: TcpListener, pool: &ThreadPool) -> Mesh {
        let deadline = Instant::now() + self.timeout;
        let listener = Arc::new(listener);
        let (sender, receiver) = unbounded::<Connection>();

        for &peer in self.peers {
            let sender = sender.clone();
            let timeout = self.timeout;

            pool.spawn(move || {
                let _ = sender.send(Connection::Dialed(peer, dial(peer, deadline, timeout)));
            });
        }

        for _ in self.peers {
            let sender = sender.clone();
            let listener = listener.clone();
            let timeout = self.timeout;

            pool.spawn(move || {
                let _ = sender.send(Connection::Accepted(accept(&listener, deadline, timeout)));
            });
        }

        drop(sender);

        let mut mesh = Mesh::default();
        let mut failures = HashMap::new();
        let collect_until = deadline + Duration::from_millis(GRACE_MILLIS);

        for _ in 0..self.peers.len() * 2 {
            match receiver.recv_deadline(collect_until) {
                Ok(Connection::Dialed(peer, Ok(stream))) => {
                    self.log.connection_established(peer);
                    mesh.outbound.insert(peer, stream);
                }
                Ok(Connection::Dialed(peer, Err(failure))) => {
                    failures.insert(peer, failure);
                }
                Ok(Connection::Accepted(Ok((stream, remote)))) => {
                    self.log.connection_accepted(remote);
                    mesh.inbound.insert(LinkKey::pending(), BufReader::new(stream));
                }
                Ok(Connection::Accepted(Err(failure))) => {
                    log::debug!("[{}] no inbound connection: {}", self.own_id, failure);
                }
                Err(_) => break,
            }
        }

        for &peer in self.peers {
            if !mesh.outbound.contains_key(&peer) {
                let reason = failures.remove(&peer).unwrap_or(PeerFailure::Timeout);
                self.log.participant_crashed(peer, reason);
                mesh.crashed.push(peer);
            }
        }

        mesh
    }
}

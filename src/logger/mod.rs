
pub mod server;

use std::fmt::Display;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use log::debug;

use crate::protocol::Message;
use crate::vote::{ParticipantId, Vote};

pub use server::{LoggerHandle, LoggerServer};

pub const ACK: &[u8; 3] = b"ACK";
/// total number of sends for one datagram, the first one included
pub const MAX_ATTEMPTS: usize = 3;

/// Ships log lines to the logger server over UDP from a single background thread, so that
/// callers never wait on the network.
#[derive(Clone)]
pub struct UdpLoggerClient {
    process_id: u16,
    sender: Sender<String>,
    pending: Arc<AtomicUsize>,
}

impl UdpLoggerClient {
    pub fn new(logger_port: u16, process_id: u16, timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.set_read_timeout(Some(timeout))?;
        socket.connect((Ipv4Addr::LOCALHOST, logger_port))?;

        let (sender, receiver) = unbounded::<String>();
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = pending.clone();

        let _ = thread::Builder::new()
            .name("udp logger".to_string())
            .spawn(move || {
                for datagram in receiver {
                    if !deliver(&socket, &datagram) {
                        debug!("logger server never acknowledged {:?}", datagram);
                    }

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })?;

        Ok(UdpLoggerClient {
            process_id,
            sender,
            pending,
        })
    }

    pub fn process_id(&self) -> u16 {
        self.process_id
    }

    /// queue `message` for delivery and return immediately
    pub fn log_to_server<T: Display>(&self, message: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);

        if self
            .sender
            .send(format!("{} {}", self.process_id, message))
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// wait until every queued datagram got acknowledged or gave up, at most `max_wait`
    pub fn flush(&self, max_wait: Duration) -> bool {
        let started_at = Instant::now();

        while self.pending.load(Ordering::SeqCst) > 0 {
            if started_at.elapsed() >= max_wait {
                return false;
            }

            thread::sleep(Duration::from_millis(10));
        }

        true
    }
}

/// send `datagram` until the server answers with an ACK or we ran out of attempts
fn deliver(socket: &UdpSocket, datagram: &str) -> bool {
    let mut buf = [0; 16];

    for _ in 0..MAX_ATTEMPTS {
        if socket.send(datagram.as_bytes()).is_err() {
            continue;
        }

        match socket.recv(&mut buf) {
            Ok(len) if &buf[..len] == ACK => return true,
            Ok(_) | Err(_) => continue,
        }
    }

    false
}

/// Every protocol event goes through here. Events are written with the `log` facade and,
/// when a logger server is configured, also shipped to it.
#[derive(Clone)]
pub struct EventLog {
    process_id: u16,
    sink: Option<UdpLoggerClient>,
}

impl EventLog {
    pub fn new(logger_port: u16, process_id: u16, timeout: Duration) -> io::Result<Self> {
        Ok(EventLog {
            process_id,
            sink: Some(UdpLoggerClient::new(logger_port, process_id, timeout)?),
        })
    }

    /// an event log that never leaves the process
    pub fn local(process_id: u16) -> Self {
        EventLog {
            process_id,
            sink: None,
        }
    }

    pub fn process_id(&self) -> u16 {
        self.process_id
    }

    pub fn flush(&self, max_wait: Duration) -> bool {
        match &self.sink {
            Some(sink) => sink.flush(max_wait),
            None => true,
        }
    }

    fn emit(&self, level: log::Level, text: String) {
        log::log!(level, "[{}] {}", self.process_id, text);

        if let Some(sink) = &self.sink {
            sink.log_to_server(text);
        }
    }

    fn lifecycle(&self, text: String) {
        self.emit(log::Level::Info, text)
    }

    fn traffic(&self, text: String) {
        self.emit(log::Level::Debug, text)
    }

    pub fn started_listening(&self, port: u16) {
        self.lifecycle(format!("started listening on port {}", port))
    }

    pub fn connection_accepted<T: Display>(&self, remote: T) {
        self.lifecycle(format!("accepted connection from {}", remote))
    }

    pub fn connection_established(&self, port: u16) {
        self.lifecycle(format!("connection established with {}", port))
    }

    pub fn message_sent<T: Display>(&self, to: T, message: &Message) {
        self.traffic(format!("message sent to {}: {}", to, message))
    }

    pub fn message_received<T: Display>(&self, from: T, message: &Message) {
        self.traffic(format!("message received from {}: {}", from, message))
    }

    pub fn join_sent(&self, coordinator: &str) {
        self.lifecycle(format!("JOIN sent to {}", coordinator))
    }

    pub fn join_received(&self, participant_id: ParticipantId) {
        self.lifecycle(format!("JOIN received from {}", participant_id))
    }

    pub fn details_sent(&self, to: ParticipantId, peers: &[ParticipantId]) {
        self.lifecycle(format!("DETAILS sent to {}: {:?}", to, peers))
    }

    pub fn details_received(&self, peers: &[ParticipantId]) {
        self.lifecycle(format!("DETAILS received: {:?}", peers))
    }

    pub fn vote_options_sent(&self, to: ParticipantId, options: &[String]) {
        self.lifecycle(format!("VOTE_OPTIONS sent to {}: {:?}", to, options))
    }

    pub fn vote_options_received(&self, options: &[String]) {
        self.lifecycle(format!("VOTE_OPTIONS received: {:?}", options))
    }

    pub fn begin_round(&self, round: usize) {
        self.lifecycle(format!("round {} started", round))
    }

    pub fn end_round(&self, round: usize) {
        self.lifecycle(format!("round {} completed", round))
    }

    pub fn votes_sent(&self, to: ParticipantId, votes: &[Vote]) {
        self.traffic(format!("votes sent to {}: {}", to, format_votes(votes)))
    }

    pub fn votes_received<T: Display>(&self, from: T, votes: &[Vote]) {
        self.traffic(format!("votes received from {}: {}", from, format_votes(votes)))
    }

    pub fn participant_crashed<T: Display, R: Display>(&self, participant: T, reason: R) {
        self.emit(
            log::Level::Warn,
            format!("participant {} crashed: {}", participant, reason),
        )
    }

    pub fn outcome_decided(&self, value: &str, voters: &[ParticipantId]) {
        self.lifecycle(format!("outcome decided: {} by {:?}", value, voters))
    }

    pub fn outcome_notified(&self, value: &str, voters: &[ParticipantId]) {
        self.lifecycle(format!("outcome notified: {} by {:?}", value, voters))
    }

    pub fn outcome_received(&self, from: ParticipantId, value: &str) {
        self.lifecycle(format!("outcome received from {}: {}", from, value))
    }
}

fn format_votes(votes: &[Vote]) -> String {
    let votes = votes.iter().map(|vote| vote.to_string()).collect::<Vec<_>>();
    format!("[{}]", votes.join(", "))
}

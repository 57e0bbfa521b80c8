use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use crate::election::mesh::{LinkKey, Mesh};
use crate::election::{merge, Election, Gossip, VoteResponse};
use crate::logger::EventLog;
use crate::vote::{Vote, VoteSet};

const TIMEOUT: Duration = Duration::from_millis(300);

fn pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap()
}

/// both ends of a fresh local TCP connection
fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let dialed = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (accepted, _) = listener.accept().unwrap();

    dialed.set_read_timeout(Some(TIMEOUT)).unwrap();
    accepted.set_read_timeout(Some(TIMEOUT)).unwrap();

    (dialed, accepted)
}

/// The far side of a link pair between us and one peer. `to_us` is what the peer writes,
/// `from_us` is where our broadcasts end up.
struct Peer {
    to_us: TcpStream,
    from_us: BufReader<TcpStream>,
}

impl Peer {
    fn say(&mut self, line: &str) {
        self.to_us.write_all(line.as_bytes()).unwrap();
        self.to_us.flush().unwrap();
    }

    fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.from_us.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_string()),
        }
    }
}

/// a mesh of unidentified inbound links, the way a freshly built mesh looks
fn mesh(peers: &[u16]) -> (Mesh, Vec<Peer>) {
    let mut mesh = Mesh::default();
    let mut far_ends = vec![];

    for peer in peers {
        let (outbound, from_us) = socket_pair();
        let (to_us, inbound) = socket_pair();

        mesh.outbound.insert(*peer, outbound);
        mesh.inbound.insert(LinkKey::pending(), BufReader::new(inbound));
        far_ends.push(Peer {
            to_us,
            from_us: BufReader::new(from_us),
        });
    }

    (mesh, far_ends)
}

fn gossip(own: Vote, roster: &[u16], mesh: Mesh) -> Gossip {
    let log = EventLog::local(own.participant_id());
    Gossip::new(own, roster, mesh, TIMEOUT, log)
}

#[test]
fn merge_keeps_the_first_vote_seen_in_a_round() {
    let mut collected: VoteSet = vec![Vote::new(9001, "A")].into_iter().collect();

    let responses = vec![
        VoteResponse::new(Some(9002), vec![Vote::new(9003, "C"), Vote::new(9002, "B")]),
        VoteResponse::new(Some(9003), vec![Vote::new(9003, "X"), Vote::new(9001, "X")]),
    ];

    let new_votes = merge(&mut collected, &responses);

    assert_eq!(new_votes, vec![Vote::new(9002, "B"), Vote::new(9003, "C")]);
    assert_eq!(
        collected.to_votes(),
        vec![
            Vote::new(9001, "A"),
            Vote::new(9002, "B"),
            Vote::new(9003, "C")
        ]
    );
}

#[test]
fn merge_is_idempotent() {
    let mut collected = VoteSet::new();
    let responses = vec![VoteResponse::new(
        Some(9002),
        vec![Vote::new(9002, "B"), Vote::new(9004, "D")],
    )];

    assert_eq!(merge(&mut collected, &responses).len(), 2);
    let snapshot = collected.clone();

    assert!(merge(&mut collected, &responses).is_empty());
    assert_eq!(collected, snapshot);
}

#[test]
fn merge_of_empty_responses_learns_nothing() {
    let mut collected: VoteSet = vec![Vote::new(9001, "A")].into_iter().collect();
    let responses = vec![VoteResponse::new(None, vec![]), VoteResponse::new(Some(9002), vec![])];

    assert!(merge(&mut collected, &responses).is_empty());
    assert_eq!(collected.len(), 1);
}

#[test]
fn responsive_peer_is_identified_in_round_one() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002], mesh);
    let pool = pool();

    peers[0].say("VOTE 9002 B\n");
    gossip.round(1, &pool);

    assert_eq!(peers[0].next_line(), Some("VOTE 9001 A".to_string()));
    assert_eq!(gossip.live_peers(), vec![9002]);
    assert_eq!(gossip.collected().participants(), vec![9001, 9002]);

    let outcome = gossip.into_outcome();
    assert_eq!(outcome.value(), "A");
    assert_eq!(outcome.voters(), &[9001, 9002]);
}

#[test]
fn silent_peer_is_dropped_for_good() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002], mesh);
    let pool = pool();

    gossip.round(1, &pool);

    assert!(gossip.live_peers().is_empty());
    assert!(gossip.outbound_peers().is_empty());
    assert_eq!(gossip.inbound_len(), 0);

    gossip.round(2, &pool);

    // the peer got our round 1 line, then the link was closed
    assert_eq!(peers[0].next_line(), Some("VOTE 9001 A".to_string()));
    assert_eq!(peers[0].next_line(), None);
    assert_eq!(gossip.into_outcome().voters(), &[9001]);
}

#[test]
fn vote_of_a_peer_crashing_later_still_counts() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "B"), &[9002], mesh);
    let pool = pool();

    peers[0].say("VOTE 9002 A\n");
    gossip.round(1, &pool);
    assert_eq!(gossip.live_peers(), vec![9002]);

    // nothing in round 2
    gossip.round(2, &pool);
    assert!(gossip.live_peers().is_empty());

    let outcome = gossip.into_outcome();
    assert_eq!(outcome.value(), "A");
    assert_eq!(outcome.voters(), &[9001, 9002]);
}

#[test]
fn only_new_votes_are_relayed() {
    // 9004 is configured but never made it into our mesh
    let roster = [9002, 9003, 9004];
    let (mesh, mut peers) = mesh(&[9002, 9003]);
    let mut gossip = gossip(Vote::new(9001, "A"), &roster, mesh);
    let pool = pool();

    peers[0].say("VOTE 9002 B\n");
    peers[1].say("VOTE 9003 C\n");
    gossip.round(1, &pool);
    assert_eq!(gossip.live_peers(), vec![9002, 9003]);
    let after_first_round = gossip.collected().len();

    // 9002 heard from 9004, which never got through to us
    peers[0].say("VOTE 9004 D\n");
    peers[1].say("VOTE\n");
    gossip.round(2, &pool);
    assert!(gossip.collected().len() >= after_first_round);
    assert!(gossip.collected().len() <= roster.len() + 1);

    for peer in peers.iter_mut() {
        assert_eq!(peer.next_line(), Some("VOTE 9001 A".to_string()));
        assert_eq!(peer.next_line(), Some("VOTE 9002 B 9003 C".to_string()));
    }

    assert_eq!(
        gossip.collected().participants(),
        vec![9001, 9002, 9003, 9004]
    );
    assert_eq!(gossip.live_peers(), vec![9002, 9003]);
}

#[test]
fn malformed_line_counts_as_no_response() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002], mesh);
    let pool = pool();

    peers[0].say("JOIN 9002\n");
    gossip.round(1, &pool);

    assert!(gossip.live_peers().is_empty());
    assert_eq!(gossip.collected().participants(), vec![9001]);
}

#[test]
fn unattributed_link_that_answers_keeps_being_polled() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002, 9003], mesh);
    let pool = pool();

    peers[0].say("VOTE 9002 B 9003 C\n");
    gossip.round(1, &pool);

    // both votes are learned, the link answered so it stays open without an identity
    assert_eq!(
        gossip.collected().participants(),
        vec![9001, 9002, 9003]
    );
    assert!(gossip.live_peers().is_empty());
    assert_eq!(gossip.inbound_len(), 1);
    assert_eq!(gossip.outbound_peers(), vec![9002]);

    peers[0].say("VOTE\n");
    gossip.round(2, &pool);

    assert_eq!(gossip.inbound_len(), 1);
    assert_eq!(gossip.outbound_peers(), vec![9002]);
    assert_eq!(peers[0].next_line(), Some("VOTE 9001 A".to_string()));
    assert_eq!(peers[0].next_line(), Some("VOTE 9002 B 9003 C".to_string()));
}

#[test]
fn peer_we_cannot_write_to_is_no_longer_read() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002], mesh);
    let pool = pool();

    peers[0].say("VOTE 9002 B\n");
    gossip.round(1, &pool);
    assert_eq!(gossip.live_peers(), vec![9002]);

    // the peer closes the stream we write to but keeps talking on the other one
    let Peer { mut to_us, from_us } = peers.remove(0);
    drop(from_us);

    for round in 2..=4 {
        to_us.write_all(b"VOTE\n").unwrap();
        gossip.round(round, &pool);
    }

    assert!(gossip.outbound_peers().is_empty());
    assert_eq!(gossip.inbound_len(), 0);
    assert_eq!(gossip.into_outcome().voters(), &[9001, 9002]);
}

#[test]
fn votes_from_outside_the_roster_are_ignored() {
    let (mesh, mut peers) = mesh(&[9002]);
    let mut gossip = gossip(Vote::new(9001, "A"), &[9002], mesh);
    let pool = pool();

    // an unknown voter cannot claim the link either
    peers[0].say("VOTE 9007 X\n");
    gossip.round(1, &pool);

    assert_eq!(gossip.collected().participants(), vec![9001]);
    assert!(gossip.live_peers().is_empty());
    assert_eq!(gossip.inbound_len(), 1);

    peers[0].say("VOTE 9002 B 9005 E 9006 F\n");
    gossip.round(2, &pool);

    assert_eq!(gossip.collected().participants(), vec![9001, 9002]);
    assert!(gossip.collected().len() <= 2);
}

#[test]
#[serial]
fn election_without_peers_decides_alone() {
    let log = EventLog::local(19301);
    let election = Election::new(
        Vote::new(19301, "A"),
        vec![19301],
        Duration::from_millis(100),
        log,
    )
    .unwrap();

    assert!(election.peers().is_empty());

    let outcome = election.hold();
    assert_eq!(outcome.participant_id(), 19301);
    assert_eq!(outcome.value(), "A");
    assert_eq!(outcome.voters(), &[19301]);
}

#[test]
#[serial]
fn election_fails_when_its_port_is_taken() {
    let _taken = TcpListener::bind("0.0.0.0:19302").unwrap();
    let log = EventLog::local(19302);

    let election = Election::new(Vote::new(19302, "A"), vec![], TIMEOUT, log);
    assert!(matches!(election, Err(crate::error::ElectionError::Bind(_))));
}

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use crate::config::ParticipantOptions;
use crate::error::ElectionError;
use crate::logger::EventLog;
use crate::participant::Participant;
use crate::protocol::error::ProtocolErrorType;
use crate::protocol::MessageKind;

fn participant(coordinator_port: u16, port: u16, timeout: Duration) -> Participant {
    let options = ParticipantOptions::new(
        format!("127.0.0.1:{}", coordinator_port),
        0,
        port,
        timeout,
    );

    Participant::new(options, EventLog::local(port))
}

#[test]
#[serial]
fn lone_participant_reports_its_own_vote() {
    let coordinator = TcpListener::bind("127.0.0.1:0").unwrap();
    let coordinator_port = coordinator.local_addr().unwrap().port();

    let fake_coordinator = thread::spawn(move || {
        let (stream, _) = coordinator.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        let mut join = String::new();
        reader.read_line(&mut join).unwrap();

        writeln!(writer, "DETAILS").unwrap();
        writeln!(writer, "VOTE_OPTIONS X").unwrap();

        let mut outcome = String::new();
        reader.read_line(&mut outcome).unwrap();

        (join.trim_end().to_string(), outcome.trim_end().to_string())
    });

    let outcome = participant(coordinator_port, 19401, Duration::from_millis(200))
        .run()
        .unwrap();

    assert_eq!(outcome.value(), "X");
    assert_eq!(outcome.voters(), &[19401]);

    let (join, reported) = fake_coordinator.join().unwrap();
    assert_eq!(join, "JOIN 19401");
    assert_eq!(reported, "OUTCOME X 19401");
}

#[test]
#[serial]
fn unreachable_coordinator_is_fatal() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = participant(port, 19402, Duration::from_millis(200)).run();
    assert!(matches!(result, Err(ElectionError::Coordinator(_))));
}

#[test]
#[serial]
fn silent_coordinator_is_fatal() {
    let coordinator = TcpListener::bind("127.0.0.1:0").unwrap();
    let coordinator_port = coordinator.local_addr().unwrap().port();

    let result = participant(coordinator_port, 19403, Duration::from_millis(200)).run();
    assert!(matches!(result, Err(ElectionError::Coordinator(_))));

    drop(coordinator);
}

#[test]
#[serial]
fn garbled_details_are_fatal() {
    let coordinator = TcpListener::bind("127.0.0.1:0").unwrap();
    let coordinator_port = coordinator.local_addr().unwrap().port();

    let fake_coordinator = thread::spawn(move || {
        let (mut stream, _) = coordinator.accept().unwrap();
        writeln!(stream, "DETAILS 9001 nine").unwrap();
        // keep the connection open until the participant gave up
        thread::sleep(Duration::from_millis(300));
    });

    let result = participant(coordinator_port, 19404, Duration::from_millis(200)).run();
    assert!(matches!(result, Err(ElectionError::Protocol(_))));

    fake_coordinator.join().unwrap();
}

#[test]
#[serial]
fn options_before_details_are_fatal() {
    let coordinator = TcpListener::bind("127.0.0.1:0").unwrap();
    let coordinator_port = coordinator.local_addr().unwrap().port();

    let fake_coordinator = thread::spawn(move || {
        let (mut stream, _) = coordinator.accept().unwrap();
        writeln!(stream, "VOTE_OPTIONS A B").unwrap();
        thread::sleep(Duration::from_millis(300));
    });

    let result = participant(coordinator_port, 19405, Duration::from_millis(200)).run();

    match result {
        Err(ElectionError::Protocol(err)) => assert_eq!(
            err.err_type(),
            &ProtocolErrorType::UnexpectedKind {
                expected: MessageKind::Details,
                found: MessageKind::VoteOptions,
            }
        ),
        _ => panic!("expected an unexpected kind error"),
    }

    fake_coordinator.join().unwrap();
}

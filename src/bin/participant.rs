use std::error::Error;
use std::time::Duration;

use clap::Parser;
use votemesh::{EventLog, Participant, ParticipantOptions};

#[derive(Parser)]
#[command(version, about = "Join an election and vote")]
struct Cli {
    /// `host:port` of the coordinator, a bare port means localhost
    coordinator: String,

    /// UDP port of the logger server
    logger_port: u16,

    /// Port to listen on for peers, also our identity
    port: u16,

    /// Timeout in milliseconds
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let timeout = Duration::from_millis(cli.timeout);
    let coordinator = match cli.coordinator.parse::<u16>() {
        Ok(port) => format!("127.0.0.1:{}", port),
        Err(_) => cli.coordinator,
    };

    let options = ParticipantOptions::new(
        coordinator,
        cli.logger_port,
        cli.port,
        timeout,
    );
    options.validate()?;

    let log = EventLog::new(options.logger_port, options.port, timeout)?;
    let outcome = Participant::new(options, log.clone()).run()?;

    println!("{}", outcome);

    // give the last log lines a chance to reach the logger server
    let _ = log.flush(timeout * 3);
    Ok(())
}

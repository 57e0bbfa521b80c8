use std::error::Error;
use std::time::Duration;

use clap::Parser;
use votemesh::{Coordinator, CoordinatorOptions, EventLog};

#[derive(Parser)]
#[command(version, about = "Gather participants and hand out the vote options")]
struct Cli {
    /// Port to listen on for participants
    port: u16,

    /// UDP port of the logger server
    logger_port: u16,

    /// Number of participants to wait for
    participants: usize,

    /// Timeout in milliseconds
    timeout: u64,

    /// Values participants can vote for
    #[arg(required = true)]
    options: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let timeout = Duration::from_millis(cli.timeout);
    let options = CoordinatorOptions::new(
        cli.port,
        cli.logger_port,
        cli.participants,
        timeout,
        cli.options,
    );
    options.validate()?;

    let log = EventLog::new(options.logger_port, options.port, timeout)?;
    let report = Coordinator::bind(options, log.clone())?.run();

    for (participant_id, outcome) in report.outcomes() {
        println!("{}: {}", participant_id, outcome);
    }

    match report.agreed_value() {
        Some(value) => println!("agreed on {}", value),
        None => println!("no agreement"),
    }

    let _ = log.flush(timeout * 3);
    Ok(())
}

use std::error::Error;
use std::fs::File;
use std::io::LineWriter;

use chrono::Utc;
use clap::Parser;
use votemesh::LoggerServer;

#[derive(Parser)]
#[command(version, about = "Record log lines sent by participants and the coordinator")]
struct Cli {
    /// UDP port to listen on
    port: u16,

    /// File to append to, `logger_server_<unix millis>.log` by default
    #[arg(long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let output = cli
        .output
        .unwrap_or_else(|| format!("logger_server_{}.log", Utc::now().timestamp_millis()));
    let file = File::create(&output)?;

    log::info!("recording to {}", output);

    let server = LoggerServer::bind(cli.port, LineWriter::new(file))?;
    let (_stop, stop_receiver) = crossbeam_channel::bounded::<()>(1);

    // serve until killed
    server.run(stop_receiver);

    Ok(())
}

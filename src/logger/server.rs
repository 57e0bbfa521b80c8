use std::io::{self, ErrorKind, Write};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{error, info};

use super::ACK;

const DATAGRAM_SIZE: usize = 1024;
const STOP_POLL_INTERVAL_MILLIS: u64 = 100;

/// Receives `<processId> <text>` datagrams, appends `<processId> <unix millis> <text>` lines
/// to `writer` and acknowledges each datagram with `ACK`.
pub struct LoggerServer<W: Write + Send + 'static> {
    socket: UdpSocket,
    writer: W,
}

pub struct LoggerHandle {
    stop: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl<W: Write + Send + 'static> LoggerServer<W> {
    pub fn bind(port: u16, writer: W) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_read_timeout(Some(Duration::from_millis(STOP_POLL_INTERVAL_MILLIS)))?;

        info!("logger server listening on {}", socket.local_addr()?);

        Ok(LoggerServer { socket, writer })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> io::Result<()> {
        let datagram = String::from_utf8_lossy(datagram);
        let datagram = datagram.trim();

        let (process_id, text) = match datagram.find(' ') {
            Some(index) => (&datagram[..index], datagram[index + 1..].trim()),
            None => (datagram, ""),
        };

        writeln!(
            self.writer,
            "{} {} {}",
            process_id,
            Utc::now().timestamp_millis(),
            text
        )?;
        self.writer.flush()?;

        self.socket.send_to(ACK, from)?;

        Ok(())
    }

    /// serve until a message arrives on `stop` or its sender is dropped
    pub fn run(mut self, stop: Receiver<()>) {
        let mut buf = [0; DATAGRAM_SIZE];

        loop {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if let Err(err) = self.handle_datagram(&buf[..len], from) {
                        error!("cannot record datagram from {}: {}", from, err);
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
                Err(err) => {
                    error!("logger server stopped: {}", err);
                    break;
                }
            }
        }
    }

    pub fn spawn(self) -> io::Result<LoggerHandle> {
        let (stop, stop_receiver) = bounded::<()>(1);

        let join_handle = thread::Builder::new()
            .name("logger server".to_string())
            .spawn(move || self.run(stop_receiver))?;

        Ok(LoggerHandle { stop, join_handle })
    }
}

impl LoggerHandle {
    pub fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.join_handle.join();
    }
}

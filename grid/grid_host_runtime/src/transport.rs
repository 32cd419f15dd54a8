//! Length-prefixed text frames over TCP.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! UTF-8. A reader thread feeds a bounded event queue and a writer thread
//! drains a bounded outbound queue, so neither side of the socket can stall
//! frame application.

use std::io::{self, Read, Write};
use std::net::{Shutdown as SocketShutdown, TcpStream, ToSocketAddrs};
use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::OutboundFrame;

pub const GRID_TO_SERVER_CAP: usize = 65_536;
pub const SERVER_TO_GRID_CAP: usize = 1_048_576;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Error(String),
    Closed,
}

pub struct TcpTransport {
    stream: TcpStream,
    events: Receiver<TransportEvent>,
    outbound: SyncSender<OutboundFrame>,
    outbound_cap: usize,
    dropped_status: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<io::Result<()>>,
}

impl TcpTransport {
    pub fn connect(
        endpoint: &str,
        connect_timeout: Duration,
        inbound_cap: usize,
        outbound_cap: usize,
    ) -> io::Result<Self> {
        let stream = open_stream(endpoint, connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let (event_tx, events) = mpsc::sync_channel(inbound_cap);
        let (outbound, outbound_rx) = mpsc::sync_channel(outbound_cap);

        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;

        let reader = thread::spawn(move || pump_events(read_half, &event_tx, inbound_cap));
        let writer = thread::spawn(move || writer_loop(write_half, outbound_rx));

        debug!(endpoint, "transport connected");
        Ok(Self {
            stream,
            events,
            outbound,
            outbound_cap,
            dropped_status: 0,
            reader,
            writer,
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<TransportEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Queues a frame for the writer. Status frames are dropped when the
    /// queue is full; every other frame waits for room.
    pub fn send(&mut self, frame: OutboundFrame) -> io::Result<()> {
        if !frame.is_droppable() {
            return self.outbound.send(frame).map_err(|_| writer_gone());
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_status += 1;
                let dropped = self.dropped_status;
                if dropped == 1 || dropped.is_power_of_two() {
                    warn!(
                        cap = self.outbound_cap,
                        dropped, "outbound queue full; dropping status frames"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(writer_gone()),
        }
    }

    pub fn dropped_status(&self) -> u64 {
        self.dropped_status
    }

    /// Flushes queued frames, closes the socket and joins both threads.
    pub fn close(self) {
        let Self {
            stream,
            events,
            outbound,
            reader,
            writer,
            ..
        } = self;

        drop(events);
        drop(outbound);

        match writer.join() {
            Ok(Err(err)) => debug!(%err, "writer stopped with error"),
            Err(_) => warn!("writer thread panicked"),
            Ok(Ok(())) => {}
        }

        let _ = stream.shutdown(SocketShutdown::Both);
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
    }
}

/// Tries each resolved address in turn, giving every attempt at most
/// `timeout`.
fn open_stream(endpoint: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in endpoint.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{endpoint} resolved to no address"),
        )
    }))
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport writer stopped")
}

fn pump_events(stream: TcpStream, events: &SyncSender<TransportEvent>, cap: usize) {
    let mut blocked: u64 = 0;

    let result = reader_loop(stream, |text| {
        let event = TransportEvent::Message(text);
        match events.try_send(event) {
            Ok(()) => ControlFlow::Continue(()),
            Err(TrySendError::Full(event)) => {
                blocked += 1;
                if blocked == 1 || blocked.is_power_of_two() {
                    warn!(cap, blocked, "inbound queue full; reader waiting");
                }
                match events.send(event) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            }
            Err(TrySendError::Disconnected(_)) => ControlFlow::Break(()),
        }
    });

    if let Err(err) = result {
        debug!(%err, "reader loop terminated with error");
        let _ = events.send(TransportEvent::Error(err.to_string()));
    }
    let _ = events.send(TransportEvent::Closed);
}

/// Reads frames until EOF or until `on_frame` breaks. Payloads that are not
/// valid UTF-8 are decoded lossily.
pub fn reader_loop<F>(mut reader: impl Read, mut on_frame: F) -> io::Result<()>
where
    F: FnMut(String) -> ControlFlow<()>,
{
    loop {
        match read_frame(&mut reader, SERVER_TO_GRID_CAP) {
            Ok(payload) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                if on_frame(text).is_break() {
                    return Ok(());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

pub fn writer_loop(mut writer: impl Write, rx: Receiver<OutboundFrame>) -> io::Result<()> {
    for frame in rx {
        write_frame(&mut writer, frame.to_string().as_bytes(), GRID_TO_SERVER_CAP)?;
        writer.flush()?;
    }

    Ok(())
}

pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

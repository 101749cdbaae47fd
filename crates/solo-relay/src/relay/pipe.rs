//! Full-duplex byte pipe between an inbound and an upstream socket.
//!
//! Each direction runs in its own task. When a direction reads EOF from its
//! source it half-closes the destination's write side and the source's read
//! side, leaving the opposite direction free to keep draining. The first
//! real error from either direction ends the pipe; both sockets are closed
//! once [`bridge`] returns.

use socket2::SockRef;
use std::fmt;
use std::io;
use std::net::Shutdown;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::debug;

/// One direction of the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound client → upstream.
    Uplink,
    /// Upstream → inbound client.
    Downlink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => f.write_str("uplink"),
            Direction::Downlink => f.write_str("downlink"),
        }
    }
}

/// Bytes moved by a finished pipe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub uplink_bytes: u64,
    pub downlink_bytes: u64,
}

/// Relay bytes between `inbound` and `upstream` until both directions finish.
///
/// Returns the byte counts on a clean finish, or the first non-benign I/O
/// error seen in either direction.
pub async fn bridge(inbound: TcpStream, upstream: TcpStream) -> io::Result<BridgeStats> {
    let (inbound_read, inbound_write) = inbound.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let (done_tx, mut done_rx) = mpsc::channel::<(Direction, io::Result<u64>)>(2);

    let uplink = tokio::spawn(pump(
        Direction::Uplink,
        inbound_read,
        upstream_write,
        done_tx.clone(),
    ));
    let downlink = tokio::spawn(pump(
        Direction::Downlink,
        upstream_read,
        inbound_write,
        done_tx,
    ));

    let mut stats = BridgeStats::default();
    let mut outcome = Ok(());

    // `None` means both senders are gone without reporting (a pump panicked).
    while let Some((direction, result)) = done_rx.recv().await {
        match result {
            Ok(n) => match direction {
                Direction::Uplink => stats.uplink_bytes = n,
                Direction::Downlink => stats.downlink_bytes = n,
            },
            Err(e) if is_benign_close(&e) => {
                debug!(%direction, error = %e, "direction ended by peer cleanup");
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    // Stop whichever direction is still running and wait for its halves to drop,
    // so both sockets are closed before the caller releases the gate.
    uplink.abort();
    downlink.abort();
    for (direction, task) in [(Direction::Uplink, uplink), (Direction::Downlink, downlink)] {
        if let Some(e) = task_failure(direction, task.await) {
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }

    outcome.map(|()| stats)
}

/// A pump that panicked never reported through the channel; turn that into
/// an error. Cancellation by our own `abort` is expected and ignored.
fn task_failure(direction: Direction, joined: Result<(), JoinError>) -> Option<io::Error> {
    match joined {
        Err(e) if e.is_panic() => Some(io::Error::other(format!("{direction} task panicked"))),
        _ => None,
    }
}

async fn pump(
    direction: Direction,
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    done: mpsc::Sender<(Direction, io::Result<u64>)>,
) {
    let result = copy_then_half_close(&mut src, &mut dst).await;
    let _ = done.send((direction, result)).await;
}

async fn copy_then_half_close(src: &mut OwnedReadHalf, dst: &mut OwnedWriteHalf) -> io::Result<u64> {
    let copied = tokio::io::copy(src, dst).await?;

    // Source hit EOF: pass the FIN on and stop reading.
    if let Err(e) = dst.shutdown().await {
        if !is_benign_close(&e) {
            return Err(e);
        }
    }
    let src_stream: &TcpStream = src.as_ref();
    if let Err(e) = SockRef::from(src_stream).shutdown(Shutdown::Read) {
        if !is_benign_close(&e) {
            return Err(e);
        }
    }

    Ok(copied)
}

/// Whether `err` is the "socket already closed" artifact left by the other
/// direction's half-close rather than a transport failure.
pub fn is_benign_close(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
}

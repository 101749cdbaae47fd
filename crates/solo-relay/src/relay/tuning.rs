//! Best-effort socket tuning for both legs of a relayed connection.

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::warn;

/// Disable Nagle and, when `buffer` is set, size the kernel send/receive buffers.
///
/// Every failure is logged and otherwise ignored; an untuned socket still relays.
pub fn tune_socket(stream: &TcpStream, buffer: Option<usize>, leg: &'static str) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(leg, error = %e, "failed to set TCP_NODELAY");
    }

    let Some(size) = buffer else {
        return;
    };

    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_send_buffer_size(size) {
        warn!(leg, size, error = %e, "failed to set send buffer size");
    }
    if let Err(e) = sock.set_recv_buffer_size(size) {
        warn!(leg, size, error = %e, "failed to set receive buffer size");
    }
}

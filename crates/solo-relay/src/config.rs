//! Relay configuration: validated command-line values.

use solo_core::{RelayError, RelayResult};
use std::path::PathBuf;
use tracing::info;

/// Default send/receive buffer size applied to both legs of a relayed connection.
pub const DEFAULT_SOCKET_BUFFER: usize = 256 * 1024;

/// Resolved relay configuration (blank values rejected, optional ones normalized).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `host:port` the relay accepts connections on.
    pub listen_addr: String,
    /// `host:port` every admitted connection is bridged to.
    pub upstream_addr: String,
    /// `host:port` of the status endpoint; `None` disables it.
    pub status_addr: Option<String>,
    /// Path or name of the `tailscale` binary used for identity lookups.
    pub tailscale_bin: PathBuf,
    /// Socket buffer size in bytes; `None` leaves the OS defaults.
    pub socket_buffer: Option<usize>,
}

impl RelayConfig {
    /// Validate raw flag values.
    pub fn new(
        listen_addr: &str,
        upstream_addr: &str,
        status_addr: Option<&str>,
        tailscale_bin: &str,
        socket_buffer: usize,
    ) -> RelayResult<Self> {
        let listen_addr = listen_addr.trim();
        if listen_addr.is_empty() {
            return Err(RelayError::Config("listen address is required".to_string()));
        }
        let upstream_addr = upstream_addr.trim();
        if upstream_addr.is_empty() {
            return Err(RelayError::Config("upstream address is required".to_string()));
        }

        let listen_addr = normalize(listen_addr, "0.0.0.0")?;
        let upstream_addr = normalize(upstream_addr, "127.0.0.1")?;

        let status_addr = match status_addr.map(str::trim).filter(|s| !s.is_empty()) {
            Some(addr) => Some(normalize(addr, "0.0.0.0")?),
            None => {
                info!("status address not set, status endpoint disabled");
                None
            }
        };

        let tailscale_bin = match tailscale_bin.trim() {
            "" => PathBuf::from("tailscale"),
            bin => PathBuf::from(bin),
        };

        Ok(Self {
            listen_addr,
            upstream_addr,
            status_addr,
            tailscale_bin,
            socket_buffer: (socket_buffer > 0).then_some(socket_buffer),
        })
    }
}

/// Require a numeric port and fill in `default_host` for the `:port` shorthand.
///
/// The host part is otherwise left alone; it is resolved at bind/dial time.
fn normalize(addr: &str, default_host: &str) -> RelayResult<String> {
    match addr.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => {
            if host.is_empty() {
                Ok(format!("{default_host}:{port}"))
            } else {
                Ok(addr.to_string())
            }
        }
        _ => Err(RelayError::InvalidAddress(format!("{addr} (expected host:port)"))),
    }
}

//! Accept loop: admits inbound connections through the gate and bridges
//! each admitted one to the upstream in its own task.

use super::pipe::bridge;
use super::tuning::tune_socket;
use crate::config::RelayConfig;
use solo_core::{AccessGate, GatePass, RelayResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Bound relay listener, ready to [`run`](RelayEngine::run).
pub struct RelayEngine {
    listener: TcpListener,
    upstream_addr: Arc<str>,
    socket_buffer: Option<usize>,
    gate: Arc<AccessGate>,
}

impl RelayEngine {
    /// Bind the listen address from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`](solo_core::RelayError::Io) if the address
    /// cannot be bound; this is fatal for the process.
    pub async fn bind(config: &RelayConfig, gate: Arc<AccessGate>) -> RelayResult<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self {
            listener,
            upstream_addr: Arc::from(config.upstream_addr.as_str()),
            socket_buffer: config.socket_buffer,
            gate,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listen socket fails.
    ///
    /// Per-connection failures never end the loop; only an accept error does,
    /// and it is returned to the caller.
    pub async fn run(self) -> RelayResult<()> {
        info!(
            addr = %self.local_addr()?,
            upstream = %self.upstream_addr,
            "listening"
        );

        loop {
            let (stream, remote) = self.listener.accept().await?;
            self.dispatch(stream, remote);
        }
    }

    fn dispatch(&self, stream: TcpStream, remote: SocketAddr) {
        let peer = remote.ip().to_canonical();
        info!(peer = %peer, "connected");

        let Some(pass) = self.gate.admit(peer) else {
            info!(peer = %peer, "busy");
            return;
        };
        info!(peer = %peer, "joined");

        let upstream_addr = self.upstream_addr.clone();
        let socket_buffer = self.socket_buffer;
        tokio::spawn(async move {
            relay_connection(stream, pass, &upstream_addr, socket_buffer).await;
        });
    }
}

/// Bridge one admitted connection; the gate is released when `pass` drops.
async fn relay_connection(
    inbound: TcpStream,
    pass: GatePass,
    upstream_addr: &str,
    socket_buffer: Option<usize>,
) {
    let peer = pass.address();

    let upstream = match TcpStream::connect(upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer = %peer, upstream = %upstream_addr, error = %e, "upstream dial failed");
            return;
        }
    };

    tune_socket(&inbound, socket_buffer, "inbound");
    tune_socket(&upstream, socket_buffer, "upstream");

    match bridge(inbound, upstream).await {
        Ok(stats) => info!(
            peer = %peer,
            sent = stats.uplink_bytes,
            received = stats.downlink_bytes,
            "done"
        ),
        Err(e) => warn!(peer = %peer, error = %e, "relay error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SOCKET_BUFFER;
    use socket2::SockRef;
    use std::net::IpAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpSocket;
    use tokio::sync::oneshot;

    /// Upstream that writes back whatever it reads.
    async fn spawn_echo_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let (mut r, mut w) = stream.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                    let _ = w.shutdown().await;
                });
            }
        });
        addr
    }

    /// Upstream that reads one byte from each connection and then resets it.
    async fn spawn_resetting_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1];
                let _ = stream.read_exact(&mut buf).await;
                let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
            }
        });
        addr
    }

    /// Upstream that accepts one connection and holds it, silent, until `release` fires.
    async fn spawn_silent_upstream() -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release, released) = oneshot::channel();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let _ = released.await;
            drop(stream);
        });
        (addr, release)
    }

    async fn start_relay(upstream: SocketAddr) -> (SocketAddr, Arc<AccessGate>) {
        let config = RelayConfig::new(
            "127.0.0.1:0",
            &upstream.to_string(),
            None,
            "tailscale",
            DEFAULT_SOCKET_BUFFER,
        )
        .unwrap();
        let gate = Arc::new(AccessGate::new());
        let engine = RelayEngine::bind(&config, gate.clone()).await.unwrap();
        let addr = engine.local_addr().unwrap();
        tokio::spawn(engine.run());
        (addr, gate)
    }

    /// Connect to `relay` from a specific loopback source address.
    async fn connect_from(source: &str, relay: SocketAddr) -> TcpStream {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind(format!("{source}:0").parse().unwrap()).unwrap();
        socket.connect(relay).await.unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// True once the relay has closed `stream` (EOF or reset).
    async fn closed_by_relay(stream: &mut TcpStream) -> bool {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            _ => false,
        }
    }

    #[tokio::test]
    async fn test_bytes_arrive_in_order_and_echo_back() {
        let upstream = spawn_echo_upstream().await;
        let (relay, _gate) = start_relay(upstream).await;

        let mut client = connect_from("127.0.0.1", relay).await;
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let (mut r, mut w) = client.split();
        let write = async {
            w.write_all(&payload).await.unwrap();
            w.shutdown().await.unwrap();
        };
        let read = async {
            let mut echoed = Vec::new();
            r.read_to_end(&mut echoed).await.unwrap();
            echoed
        };
        let ((), echoed) = tokio::join!(write, read);
        assert_eq!(echoed, expected);
    }

    #[tokio::test]
    async fn test_second_peer_denied_until_holder_leaves() {
        let upstream = spawn_echo_upstream().await;
        let (relay, gate) = start_relay(upstream).await;

        let mut holder = connect_from("127.0.0.1", relay).await;
        holder.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        holder.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            gate.snapshot().unwrap().address,
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );

        // Same peer may open more connections.
        let mut second = connect_from("127.0.0.1", relay).await;
        second.write_all(b"yo").await.unwrap();
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"yo");

        let mut intruder = connect_from("127.0.0.2", relay).await;
        assert!(closed_by_relay(&mut intruder).await);

        drop(second);
        drop(holder);
        wait_for(|| gate.snapshot().is_none()).await;

        let mut newcomer = connect_from("127.0.0.2", relay).await;
        newcomer.write_all(b"ok").await.unwrap();
        newcomer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        assert_eq!(
            gate.snapshot().unwrap().address,
            "127.0.0.2".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_upstream_dial_failure_releases_gate() {
        // Grab a free port, then close it so nothing listens there.
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let (relay, gate) = start_relay(dead).await;

        let mut client = connect_from("127.0.0.1", relay).await;
        assert!(closed_by_relay(&mut client).await);
        wait_for(|| gate.snapshot().is_none()).await;

        // The listener survived the failed connection.
        let mut again = connect_from("127.0.0.2", relay).await;
        assert!(closed_by_relay(&mut again).await);
    }

    #[tokio::test]
    async fn test_upstream_reset_releases_gate() {
        let upstream = spawn_resetting_upstream().await;
        let (relay, gate) = start_relay(upstream).await;

        let mut client = connect_from("127.0.0.1", relay).await;
        wait_for(|| gate.snapshot().is_some()).await;
        client.write_all(b"x").await.unwrap();

        assert!(closed_by_relay(&mut client).await);
        wait_for(|| gate.snapshot().is_none()).await;

        // Another peer can take over after the errored relay.
        let _next = connect_from("127.0.0.2", relay).await;
        let newcomer: IpAddr = "127.0.0.2".parse().unwrap();
        wait_for(|| gate.snapshot().is_some_and(|h| h.address == newcomer)).await;
    }

    #[tokio::test]
    async fn test_gate_held_until_silent_upstream_closes() {
        let (upstream, release) = spawn_silent_upstream().await;
        let (relay, gate) = start_relay(upstream).await;

        let client = connect_from("127.0.0.1", relay).await;
        wait_for(|| gate.snapshot().is_some()).await;
        drop(client);

        // Only the client's direction has finished; the upstream one is still open.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(gate.snapshot().is_some());

        release.send(()).unwrap();
        wait_for(|| gate.snapshot().is_none()).await;
    }
}

//! Relay module — the TCP side of solo-relay.
//!
//! # Submodule Architecture
//!
//! - **[`listener`]** — [`RelayEngine`] binds the listen address, accepts
//!   connections, asks the [`AccessGate`](solo_core::AccessGate) for
//!   admission and spawns one relay task per admitted connection.
//!
//! - **[`pipe`]** — [`bridge`](pipe::bridge) copies bytes in both directions
//!   with independent half-close, returning the first real error.
//!
//! - **[`tuning`]** — best-effort `TCP_NODELAY` and buffer sizing applied to
//!   both legs before bridging.
//!
//! # Data Flow
//!
//! ```text
//! accept
//!   → AccessGate::admit(peer)          denied → close
//!     → spawn relay task
//!         → TcpStream::connect(upstream) failed → close, release
//!         → tune_socket (both legs)
//!         → bridge(inbound, upstream)
//!         → drop GatePass              → release
//! ```

pub mod listener;
pub mod pipe;
pub mod tuning;

pub use listener::RelayEngine;

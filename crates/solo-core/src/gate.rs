//! Admission gate — decides which remote peer may use the relay.
//!
//! The gate holds a single slot. The first address admitted while the slot
//! is empty becomes the *holder*; further connections from the same address
//! are reference-counted, and every other address is refused until the
//! holder's count drains back to zero.
//!
//! Two entry points exist:
//!
//! - [`AccessGate::try_acquire`] / [`AccessGate::release`] — the raw
//!   counting operations.
//! - [`AccessGate::admit`] — returns a [`GatePass`] that releases on drop, so
//!   a spawned relay task gives the slot back on every exit path.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Millisecond wall clock used to stamp the start of a holding episode.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// The peer currently permitted to use the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderRecord {
    /// Canonical IP of the holder (IPv4-mapped IPv6 collapsed to IPv4).
    pub address: IpAddr,
    /// Number of admitted connections from `address` still open. Always >= 1.
    pub reference_count: u32,
    /// Milliseconds since the Unix epoch when the slot became occupied.
    pub since: i64,
}

/// Single-holder admission gate.
///
/// All state lives behind one mutex which is only held for O(1) updates,
/// never across I/O.
pub struct AccessGate {
    slot: Arc<Mutex<Option<HolderRecord>>>,
    clock: Clock,
}

impl AccessGate {
    /// Create an empty gate stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_millis))
    }

    /// Create an empty gate with a custom clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            clock,
        }
    }

    /// Try to admit one connection from `address`.
    ///
    /// Returns `true` when the slot was empty (a new episode starts) or is
    /// already held by `address` (its count goes up). Returns `false`,
    /// leaving state untouched, when another address holds the slot.
    pub fn try_acquire(&self, address: IpAddr) -> bool {
        let address = address.to_canonical();
        let mut slot = lock(&self.slot);

        match slot.as_mut() {
            None => {
                *slot = Some(HolderRecord {
                    address,
                    reference_count: 1,
                    since: (self.clock)(),
                });
                debug!(peer = %address, "holder slot taken");
                true
            }
            Some(holder) if holder.address == address => {
                holder.reference_count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Give back one admission for `address`.
    ///
    /// A no-op when nothing is held or when `address` is not the holder.
    pub fn release(&self, address: IpAddr) {
        release_slot(&self.slot, address.to_canonical());
    }

    /// Admit `address` and return a pass that releases on drop.
    pub fn admit(&self, address: IpAddr) -> Option<GatePass> {
        let address = address.to_canonical();
        if !self.try_acquire(address) {
            return None;
        }
        Some(GatePass {
            slot: self.slot.clone(),
            address,
        })
    }

    /// Copy of the current holder, if any.
    pub fn snapshot(&self) -> Option<HolderRecord> {
        *lock(&self.slot)
    }
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII admission held by one relayed connection.
///
/// Owns an `Arc` to the gate's slot so it is `Send` and can be moved into a
/// spawned task; the connection stays counted until the pass is dropped.
pub struct GatePass {
    slot: Arc<Mutex<Option<HolderRecord>>>,
    address: IpAddr,
}

impl GatePass {
    /// The canonical address this pass was issued for.
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

impl Drop for GatePass {
    fn drop(&mut self) {
        release_slot(&self.slot, self.address);
    }
}

fn release_slot(slot: &Mutex<Option<HolderRecord>>, address: IpAddr) {
    let mut slot = lock(slot);

    let Some(holder) = slot.as_mut() else {
        return;
    };
    if holder.address != address {
        return;
    }

    if holder.reference_count <= 1 {
        *slot = None;
        debug!(peer = %address, "holder slot cleared");
    } else {
        holder.reference_count -= 1;
    }
}

/// Lock the slot, recovering the data if a previous holder panicked.
fn lock(slot: &Mutex<Option<HolderRecord>>) -> MutexGuard<'_, Option<HolderRecord>> {
    slot.lock().unwrap_or_else(|poisoned| {
        warn!("gate mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

fn system_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

//! Hardware abstraction layer for the HN4 storage engine.
//!
//! Mirrors a conventional HAL split: device I/O submission with async-style
//! completion callbacks, a synchronous spin-poll wrapper, aligned allocation
//! with an integrity header, a spinlock with yield backoff, a monotonic
//! clock, a deterministic PRNG, and per-thread accelerator affinity.
//! Everything here is process-wide; callers construct one [`HalHandle`] and
//! hand it to every volume.

#![allow(unsafe_code)]

pub mod accel;
pub mod alloc;
pub mod caps;
pub mod clock;
pub mod device;
pub mod error;
pub mod nvm;
pub mod prng;
pub mod spinlock;
pub mod sync_io;
pub mod zns;

pub use accel::AcceleratorId;
pub use caps::{DeviceType, HalCaps};
pub use device::{CompletionCallback, IoOp, IoRequest, IoResult};
pub use error::HalError;
pub use spinlock::SpinLock;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

/// Process-wide HAL state. Construct once, share via `&HalHandle` or
/// `Arc<HalHandle>`; never duplicate (the PRNG seed and ZNS zone pointers
/// are singletons by design, matching the source's "global mutable state"
/// note).
#[derive(Debug)]
pub struct HalHandle {
    initialized: AtomicBool,
    caps: HalCaps,
    prng: prng::Prng,
    zones: zns::ZoneTable,
    nvm: nvm::NvmBackend,
    topology: RwLock<std::collections::HashMap<AcceleratorId, (u64, u64)>>,
    clock_epoch_ns: AtomicU64,
}

impl HalHandle {
    /// Bring up the HAL for a given device capability set.
    #[must_use]
    pub fn init(caps: HalCaps) -> Self {
        let seed = prng::stack_entropy_seed() ^ clock::monotonic_ns();
        Self {
            initialized: AtomicBool::new(true),
            zones: zns::ZoneTable::new(caps.zone_size_blocks, caps.zone_count),
            nvm: nvm::NvmBackend::new(caps.device_type == DeviceType::Nvm),
            caps,
            prng: prng::Prng::new(seed),
            topology: RwLock::new(std::collections::HashMap::new()),
            clock_epoch_ns: AtomicU64::new(clock::monotonic_ns()),
        }
    }

    /// Tear down the HAL. After this, `submit`/`sync_submit` panic — callers
    /// must not race shutdown with in-flight I/O (the core enforces this via
    /// the volume L2 lock).
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    fn require_initialized(&self) {
        if !self.initialized.load(Ordering::Acquire) {
            // Un-initialized HAL use is a process-halting defect per the HAL
            // failure-semantics contract, not a recoverable error.
            panic!("hn4-hal: operation on shut-down HalHandle");
        }
    }

    #[must_use]
    pub fn caps(&self) -> &HalCaps {
        &self.caps
    }

    #[must_use]
    pub fn prng(&self) -> &prng::Prng {
        &self.prng
    }

    #[must_use]
    pub fn zones(&self) -> &zns::ZoneTable {
        &self.zones
    }

    #[must_use]
    pub fn nvm(&self) -> &nvm::NvmBackend {
        &self.nvm
    }

    /// Register (or overwrite) the `(lba_start, lba_len)` window for an
    /// accelerator id. An empty map means "global pool" for every id.
    pub fn set_topology_window(&self, id: AcceleratorId, lba_start: u64, lba_len: u64) {
        self.topology.write().insert(id, (lba_start, lba_len));
    }

    #[must_use]
    pub fn topology_window(&self, id: AcceleratorId) -> Option<(u64, u64)> {
        self.topology.read().get(&id).copied()
    }

    #[must_use]
    pub fn topology_is_empty(&self) -> bool {
        self.topology.read().is_empty()
    }

    /// Best-effort prefetch hint. No-op on backends without a prefetch
    /// primitive (which, in this simulated HAL, is all of them).
    pub fn prefetch_hint(&self, _lba: u64, _len_sectors: u32) {
        self.require_initialized();
    }
}

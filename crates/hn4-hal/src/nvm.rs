//! Byte-addressable persistent-memory path. On real NVM hardware this is a
//! `memcpy` into MMIO followed by a cache-line persistence instruction
//! (CLWB, else CLFLUSHOPT, else CLFLUSH, else an `msync`-equivalent; ARM
//! uses `dc cvac` + `dsb ish`) and `FLUSH` is an `sfence`/`dsb ish`. This
//! simulated HAL has no real MMIO window, so the backend tracks which
//! persistence primitive *would* be selected and counts flushes, giving
//! the core something concrete to assert against in tests.

use std::sync::atomic::{AtomicU64, AtomicBool, Ordering};

/// Which cache-line persistence instruction the (simulated) CPU feature
/// probe selected, best available first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPrimitive {
    Clwb,
    Clflushopt,
    Clflush,
    MsyncEquivalent,
    ArmDcCvacDsbIsh,
}

#[derive(Debug)]
pub struct NvmBackend {
    enabled: bool,
    primitive: PersistPrimitive,
    flush_count: AtomicU64,
    armed: AtomicBool,
}

impl NvmBackend {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            primitive: Self::probe_primitive(),
            flush_count: AtomicU64::new(0),
            armed: AtomicBool::new(false),
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn probe_primitive() -> PersistPrimitive {
        PersistPrimitive::ArmDcCvacDsbIsh
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn probe_primitive() -> PersistPrimitive {
        // Best-to-worst preference order; a real probe would check CPUID
        // leaves for CLWB/CLFLUSHOPT support. This HAL always reports the
        // conservative fallback so it behaves identically on any x86 host.
        PersistPrimitive::Clflush
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn persist_primitive(&self) -> PersistPrimitive {
        self.primitive
    }

    /// Cache-line persistence step after a byte-addressable write.
    pub fn persist_line(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// `FLUSH` == `sfence`/`dsb ish`: a full-barrier drain of everything
    /// `persist_line` armed since the last flush.
    pub fn sfence(&self) {
        self.armed.store(false, Ordering::Release);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }
}

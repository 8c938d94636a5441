//! Per-thread accelerator context, used by the AI-profile allocator
//! affinity contract. Thread-local; if the platform lacked TLS the
//! contract is "affinity disabled", never "silently shared" — in this
//! HAL, `std::thread_local!` is always available, so the degraded path
//! only exists as an explicit, testable branch.

use std::cell::Cell;

/// Identifies an accelerator (e.g. a GPU/NPU) for per-thread spatial
/// locking. `NONE` means "no accelerator affinity requested".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcceleratorId(pub u32);

impl AcceleratorId {
    pub const NONE: AcceleratorId = AcceleratorId(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

thread_local! {
    static CONTEXT: Cell<AcceleratorId> = const { Cell::new(AcceleratorId::NONE) };
}

/// True on every target this HAL runs on; kept as a function rather than
/// a `const` so call sites read like a capability check, matching how the
/// rest of the HAL gates on capability flags rather than `cfg!`.
#[must_use]
pub fn tls_supported() -> bool {
    true
}

/// Set the current thread's accelerator context. No-op (context stays
/// `NONE`) if TLS is unsupported.
pub fn set_context(id: AcceleratorId) {
    if !tls_supported() {
        return;
    }
    CONTEXT.with(|c| c.set(id));
}

/// Read the current thread's accelerator context.
#[must_use]
pub fn get_context() -> AcceleratorId {
    if !tls_supported() {
        return AcceleratorId::NONE;
    }
    CONTEXT.with(|c| c.get())
}

/// Clear the current thread's accelerator context back to `NONE`.
pub fn clear_context() {
    set_context(AcceleratorId::NONE);
}

//! `HnError`: the full `spec.md` §6 result-code set, tiered per §7 into
//! validation / transient-or-degraded / fatal-to-volume-integrity.
//!
//! Two of the "error-shaped" codes are advisory, not failures:
//! `InfoHealed` and `InfoHorizonFallback` are returned as `Ok` info codes
//! via [`Info`], never as `Err(HnError)`.

/// Validation errors: recoverable by the caller by fixing the request.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("geometry invariant violated")]
    Geometry,
    #[error("alignment requirement violated")]
    AlignmentFail,
    #[error("profile cannot be honored on this hardware geometry")]
    ProfileMismatch,
    #[error("already exists")]
    Eexist,
    #[error("no space left")]
    Enospc,
    #[error("anchor is tombstoned")]
    Tombstone,
    #[error("access denied")]
    AccessDenied,
    #[error("not found")]
    NotFound,
}

/// Transient/degraded errors: recoverable by retry or by degrading.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TransientError {
    #[error("device I/O failure")]
    HwIo,
    #[error("zone is full")]
    ZoneFull,
    #[error("synchronous wait exceeded its deadline")]
    AtomicsTimeout,
    #[error("allocator exhausted its locality probes")]
    EventHorizon,
    #[error("fractal-scaled allocation collapsed with no horizon fallback")]
    GravityCollapse,
    #[error("uncorrectable data corruption on read")]
    DataRot,
}

/// Fatal-to-volume-integrity errors: surface and stop.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    #[error("more than two drives are unavailable for this parity row")]
    ParityBroken,
    #[error("write-intent journal append failed before any data write")]
    AuditFailure,
    #[error("internal invariant violated")]
    InternalFault,
    #[error("volume used before being mounted/formatted")]
    Uninitialized,
}

/// The full HN4 error type. Variants are grouped by tier, matching
/// `spec.md` §7's propagation policy.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum HnError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transient(#[from] TransientError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<hn4_hal::HalError> for HnError {
    fn from(e: hn4_hal::HalError) -> Self {
        use hn4_hal::HalError as H;
        match e {
            H::Uninitialized => HnError::Fatal(FatalError::Uninitialized),
            H::HwIo => HnError::Transient(TransientError::HwIo),
            H::ZoneFull => HnError::Transient(TransientError::ZoneFull),
            H::AtomicsTimeout => HnError::Transient(TransientError::AtomicsTimeout),
            H::AlignmentFail => HnError::Validation(ValidationError::AlignmentFail),
            H::InternalFault => HnError::Fatal(FatalError::InternalFault),
            H::InvalidArgument => HnError::Validation(ValidationError::InvalidArgument),
            H::NoMem => HnError::Fatal(FatalError::InternalFault),
        }
    }
}

pub type HnResult<T> = Result<T, HnError>;

/// Non-error info codes returned alongside a successful `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Info {
    /// No anomaly; nothing to report.
    None,
    /// The armored bitmap (or a parity read) corrected a fault in-flight.
    Healed,
    /// The flux region is saturated; the caller should switch to the
    /// horizon allocator. `RUNTIME_SATURATED` is set sticky on the volume.
    HorizonFallback,
}

impl Info {
    #[must_use]
    pub fn is_info(self) -> bool {
        !matches!(self, Info::None)
    }
}

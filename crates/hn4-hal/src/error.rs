//! HAL-level typed errors. No exceptions, no silent failures: every HAL
//! entry point that can fail returns one of these.

/// Errors surfaced by the hardware abstraction layer.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    #[error("HAL used before initialization")]
    Uninitialized,
    #[error("device I/O failure")]
    HwIo,
    #[error("zone is full")]
    ZoneFull,
    #[error("synchronous wait exceeded its deadline")]
    AtomicsTimeout,
    #[error("length is not a multiple of the block size")]
    AlignmentFail,
    #[error("internal invariant violated (zero-block chunk)")]
    InternalFault,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("allocation failed")]
    NoMem,
}

pub type HalResult<T> = Result<T, HalError>;

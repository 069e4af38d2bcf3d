//! Error type for the fixed-region allocator.

use core::fmt;

/// Errors returned by [`crate::Fmem`] operations.
///
/// Every variant is a unit variant: FMEM never needs to allocate to describe
/// a failure, so the type stays `Copy` and costs nothing on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmemError {
    /// `region.len()` is smaller than `3 * sizeof(header) + sizeof(accounting)`.
    TotalAllocationSizeTooSmall,
    /// `region.len()` cannot fit `min_alloc` plus the fixed overhead.
    BadInitMem,
    /// No free page large enough to satisfy the request remains.
    NoMem,
    /// A page's magic did not match the sentinel.
    ///
    /// Only returned when the `abort-on-corruption` feature is disabled; with
    /// it enabled the process aborts instead of returning this variant.
    CorruptionDetected,
    /// The installed committer returned an error, or a `commit_mem` range
    /// exceeded the page's payload bounds.
    ///
    /// The allocator's in-region state has already been mutated by the time
    /// this is returned — the FMEM must be treated as unusable afterwards.
    CommitFailed,
}

impl fmt::Display for FmemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FmemError::TotalAllocationSizeTooSmall => {
                write!(f, "region is too small to hold a head page, a tail page, and the accounting block")
            }
            FmemError::BadInitMem => {
                write!(f, "region cannot fit the requested min_alloc plus fixed overhead")
            }
            FmemError::NoMem => write!(f, "no free page large enough to satisfy the request"),
            FmemError::CorruptionDetected => write!(f, "page magic does not match the sentinel"),
            FmemError::CommitFailed => write!(f, "committer failed or commit range exceeded page bounds"),
        }
    }
}

impl std::error::Error for FmemError {}

/// Result alias used throughout this crate.
pub type Result<T> = core::result::Result<T, FmemError>;

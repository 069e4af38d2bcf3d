//! The committer contract: persisting dirtied sub-ranges of the region.

use core::fmt;

/// A `(start, length)` pair identifying a byte range the committer should
/// persist. `addr` is a raw in-region pointer; the committer is responsible
/// for any alignment required by whatever flush primitive it calls.
#[derive(Clone, Copy)]
pub struct CommitRange {
    /// Start of the range, as an in-region address.
    pub addr: *const u8,
    /// Length of the range in bytes.
    pub len: usize,
}

impl fmt::Debug for CommitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitRange")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish()
    }
}

/// A client-supplied callback that persists scatter/gather byte ranges to a
/// backing store (e.g. by `msync`-ing the mapped pages they fall within).
///
/// FMEM treats `commit` as synchronous: by the time it returns, the ranges
/// must be durable. A committer wanting asynchronous behavior must copy the
/// ranges out before returning. `commit` returning `Err` is fatal to the
/// operation that triggered it — FMEM has already mutated its in-region
/// state and surfaces [`crate::FmemError::CommitFailed`] to its own caller.
///
/// Never persisted: a committer is re-supplied to every `create_new`/
/// `reopen` call and is process-local, since a function pointer or trait
/// object is meaningless once written to disk.
///
/// `Send + Sync` because `Fmem` shares its committer across threads: `alloc`/
/// `free` call it under the accounting lock while `commit_user_data` calls
/// it without taking any lock at all, so two calls can run concurrently
/// against the same `&dyn Committer`.
pub trait Committer: Send + Sync {
    /// Persists every range in `ranges`.
    fn commit(&self, ranges: &[CommitRange]) -> Result<(), CommitFailure>;
}

/// Marker error returned by a failing [`Committer::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitFailure;

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "committer failed to persist one or more ranges")
    }
}

impl std::error::Error for CommitFailure {}

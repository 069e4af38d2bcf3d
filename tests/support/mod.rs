//! Shared scaffolding for the integration test suites: a heap-backed
//! stand-in for a mapped region, plus committers that record or reject the
//! ranges `Fmem` submits to them.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::Mutex;

use nos_fmem::list::Link;
use nos_fmem::page::PageHeader;
use nos_fmem::{CommitFailure, CommitRange, Committer};

/// A fixed-size, zeroed, suitably-aligned byte buffer standing in for a
/// `mmap`-ed region. Owns its memory independently of any `Fmem` built over
/// it, so tests can keep walking the raw page list after the handle exists.
pub struct Region {
    ptr: *mut u8,
    layout: Layout,
    pub len: usize,
}

impl Region {
    pub fn new(len: usize) -> Self {
        let layout = Layout::from_size_align(len, 16).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self { ptr, layout, len }
    }

    pub fn base(&self) -> *mut u8 {
        self.ptr
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// One page as seen by [`walk_pages`]: whether it's busy, and its full
/// `size` (header included).
#[derive(Debug, Clone, Copy)]
pub struct PageSnapshot {
    pub addr: usize,
    pub busy: bool,
    pub size: usize,
}

/// Walks the page list starting at `base` (interpreted as the head page),
/// returning one snapshot per page in list/memory order, head included.
///
/// # Safety
/// `base` must be the head of a valid fmem region.
pub unsafe fn walk_pages(base: *mut u8) -> Vec<PageSnapshot> {
    let head = base as *mut PageHeader;
    let mut out = vec![PageSnapshot {
        addr: head as usize,
        busy: (*head).is_busy(),
        size: (*head).size as usize,
    }];
    let head_link = &mut (*head).link as *mut Link;
    for link in Link::iter_from(head_link) {
        let page = page_from_link(link);
        out.push(PageSnapshot {
            addr: page as usize,
            busy: (*page).is_busy(),
            size: (*page).size as usize,
        });
    }
    out
}

/// # Safety
/// `link` must be the `link` field of a live `PageHeader`.
unsafe fn page_from_link(link: *mut Link) -> *mut PageHeader {
    nos_fmem::page_from_link!(link, PageHeader, link)
}

/// Counts pages reachable from `base`'s head, head included.
///
/// # Safety
/// `base` must be the head of a valid fmem region.
pub unsafe fn list_len(base: *mut u8) -> usize {
    walk_pages(base).len()
}

/// A committer that records every range it's handed, for asserting exactly
/// which ranges an operation submitted.
#[derive(Default)]
pub struct RecordingCommitter {
    ranges: Mutex<Vec<(usize, usize)>>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns everything recorded since the last call.
    pub fn take(&self) -> Vec<(usize, usize)> {
        std::mem::take(&mut *self.ranges.lock().unwrap())
    }
}

impl Committer for RecordingCommitter {
    fn commit(&self, ranges: &[CommitRange]) -> Result<(), CommitFailure> {
        let mut log = self.ranges.lock().unwrap();
        for r in ranges {
            log.push((r.addr as usize, r.len));
        }
        Ok(())
    }
}

/// A committer that always refuses, for exercising the `CommitFailed` path.
#[derive(Default)]
pub struct FailingCommitter;

impl Committer for FailingCommitter {
    fn commit(&self, _ranges: &[CommitRange]) -> Result<(), CommitFailure> {
        Err(CommitFailure)
    }
}

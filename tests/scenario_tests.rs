//! The seed scenarios enumerated for this allocator: undersize rejection,
//! basic alloc/free, split-then-exhaustion, three-way coalesce, corruption
//! detection, and the commit path's range counts.

mod support;

use std::sync::Arc;

use nos_fmem::accounting::AccountingRaw;
use nos_fmem::list::Link;
use nos_fmem::page::{HEADER_SIZE, PageHeader};
use nos_fmem::{ACCOUNTING_SIZE, Fmem, FmemError};
use support::{list_len, walk_pages, FailingCommitter, RecordingCommitter, Region};

#[test]
fn undersize_region_is_rejected() {
    let mut region = Region::new(10);
    let err = unsafe { Fmem::create_new(region.as_slice_mut(), 5, None) }.unwrap_err();
    assert_eq!(err, FmemError::TotalAllocationSizeTooSmall);
}

#[test]
fn basic_alloc_then_free_restores_accounting() {
    let mut region = Region::new(50 * 1024);
    let base = region.base();
    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, None) }.unwrap();

    let initial_available = fmem.stats().total_available;
    assert_eq!(fmem.stats().alloc_objects, 0);

    let payload = unsafe { fmem.alloc(HEADER_SIZE) }.unwrap();
    assert_eq!(fmem.stats().alloc_objects, 1);
    assert_eq!(unsafe { list_len(base) }, 3);

    let freed = unsafe { fmem.free(payload) }.unwrap();
    assert!(freed > 0);
    assert_eq!(fmem.stats().alloc_objects, 0);
    assert_eq!(unsafe { list_len(base) }, 2);
    assert_eq!(fmem.stats().total_available, initial_available);
}

#[test]
fn first_split_then_exhaustion() {
    let mut region = Region::new(50 * 1024);
    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, None) }.unwrap();

    unsafe { fmem.alloc(25 * 1024) }.expect("first 25 KiB allocation should fit");
    let second = unsafe { fmem.alloc(25 * 1024) };
    assert_eq!(second.unwrap_err(), FmemError::NoMem);
}

#[test]
fn three_way_coalesce_merges_to_one_free_page() {
    let mut region = Region::new(HEADER_SIZE * 64);
    let base = region.base();
    let unit = (HEADER_SIZE * 10) as u32;

    unsafe {
        let a = base as *mut PageHeader;
        let b = base.add(HEADER_SIZE * 10) as *mut PageHeader;
        let c = base.add(HEADER_SIZE * 20) as *mut PageHeader;
        let d = base.add(HEADER_SIZE * 30) as *mut PageHeader;

        PageHeader::init(a, unit, true);
        PageHeader::init(b, unit, false);
        PageHeader::init(c, unit, false);
        PageHeader::init(d, unit, false);

        Link::add_after(&mut (*a).link as *mut Link, &mut (*b).link as *mut Link);
        Link::add_after(&mut (*b).link as *mut Link, &mut (*c).link as *mut Link);
        Link::add_after(&mut (*c).link as *mut Link, &mut (*d).link as *mut Link);

        let survivor = nos_fmem::page::merge(c);
        assert!(std::ptr::eq(survivor, b));
        assert_eq!((*b).size, unit * 3);
        assert_eq!(list_len(base), 2);
    }
}

#[test]
fn corrupted_head_magic_is_detected_on_reopen() {
    let mut region = Region::new(50 * 1024);
    unsafe {
        let fmem = Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, None).unwrap();
        drop(fmem);

        let head = region.base() as *mut PageHeader;
        (*head).set_magic(0);

        let err = Fmem::reopen(region.as_slice_mut(), None).unwrap_err();
        assert_eq!(err, FmemError::CorruptionDetected);
    }
}

#[test]
fn corrupted_main_page_magic_is_detected_on_alloc() {
    let mut region = Region::new(50 * 1024);
    let base = region.base();
    unsafe {
        let fmem = Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, None).unwrap();

        let head = base as *mut PageHeader;
        let main_link = (*head).link.next;
        let main = nos_fmem::page_from_link!(main_link, PageHeader, link);
        (*main).set_magic(0);

        let err = fmem.alloc(25 * 1024).unwrap_err();
        assert_eq!(err, FmemError::CorruptionDetected);
    }
}

#[test]
fn create_new_commits_exactly_one_prefix_range() {
    let mut region = Region::new(50 * 1024);
    let base = region.base();
    let committer = Arc::new(RecordingCommitter::new());
    let recorder = RecordingCommitterHandle(committer.clone());

    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, Some(Box::new(recorder))) }
        .unwrap();

    let recorded = committer.take();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], (base as usize, 2 * HEADER_SIZE + ACCOUNTING_SIZE));

    drop(fmem);
}

#[test]
fn commit_user_data_covers_exactly_the_user_slots() {
    let mut region = Region::new(50 * 1024);
    let committer = Arc::new(RecordingCommitter::new());
    let fmem = unsafe {
        Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, Some(Box::new(RecordingCommitterHandle(committer.clone()))))
    }
    .unwrap();
    committer.take();

    fmem.commit_user_data().unwrap();
    let recorded = committer.take();
    assert_eq!(recorded.len(), 1);

    let expected_addr =
        region.base() as usize + HEADER_SIZE + core::mem::offset_of!(AccountingRaw, user);
    let expected_len = 4 * core::mem::size_of::<u64>();
    assert_eq!(recorded[0], (expected_addr, expected_len));
}

#[test]
fn carving_alloc_commits_three_ranges_and_free_commits_three_ranges() {
    let mut region = Region::new(50 * 1024);
    let committer = Arc::new(RecordingCommitter::new());
    let fmem = unsafe {
        Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, Some(Box::new(RecordingCommitterHandle(committer.clone()))))
    }
    .unwrap();
    committer.take();

    let payload = unsafe { fmem.alloc(4 * 1024) }.unwrap();
    assert_eq!(committer.take().len(), 3);

    unsafe { fmem.free(payload) }.unwrap();
    assert_eq!(committer.take().len(), 3);
}

#[test]
fn commit_failure_propagates_as_commit_failed() {
    let mut region = Region::new(50 * 1024);
    let err = unsafe { Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, Some(Box::new(FailingCommitter))) }
        .unwrap_err();
    assert_eq!(err, FmemError::CommitFailed);
}

#[test]
fn region_wide_invariants_hold_after_creation() {
    let mut region = Region::new(50 * 1024);
    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), HEADER_SIZE, None) }.unwrap();
    let stats = fmem.stats();

    let pages = unsafe { walk_pages(region.base()) };
    let total: usize = pages.iter().map(|p| p.size).sum();
    let free_total: usize = pages.iter().filter(|p| !p.busy).map(|p| p.size).sum();

    assert_eq!(total, stats.total_size);
    assert_eq!(free_total, stats.total_available);
}

/// Wraps an `Arc<RecordingCommitter>` so the test can keep a handle to read
/// recorded ranges after handing a boxed trait object to `Fmem`.
struct RecordingCommitterHandle(Arc<RecordingCommitter>);

impl nos_fmem::Committer for RecordingCommitterHandle {
    fn commit(&self, ranges: &[nos_fmem::CommitRange]) -> Result<(), nos_fmem::CommitFailure> {
        self.0.commit(ranges)
    }
}

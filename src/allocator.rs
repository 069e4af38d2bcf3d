//! The allocator layer: region-wide accounting and the create/reopen/alloc/
//! free/commit operations that orchestrate the page and list layers.

use crate::accounting::{AccountingRaw, ACCOUNTING_SIZE, USER_SLOTS};
use crate::committer::{CommitRange, Committer};
use crate::error::{FmemError, Result};
use crate::list::Link;
use crate::page::{actual, carve, fit, merge, poison_check, Fit, PageHeader, HEADER_SIZE, MAGIC_SENTINEL};
use crate::page_from_link;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// A handle to a fixed-region allocator. Wraps two pointers into the mapped
/// region (the head page and the accounting block it carries) plus a
/// process-local committer; the handle itself carries no region bytes, but
/// is bound by `'r` to the region's backing buffer so the borrow checker
/// keeps that buffer alive for as long as the handle exists — dropping or
/// reusing the region while an `Fmem` still points into it is a compile
/// error, not a dangling-pointer bug reachable through safe calls like
/// `alloc`/`stats`.
///
/// `Fmem` is `Send`/`Sync`: every mutation to shared state goes through the
/// in-region spinlock, `user1..user4` are documented as the caller's
/// responsibility to serialize, and `Committer: Send + Sync` keeps the
/// shared committer sound to call from multiple threads at once.
pub struct Fmem<'r> {
    head: NonNull<PageHeader>,
    accounting: NonNull<AccountingRaw>,
    committer: Option<Box<dyn Committer>>,
    _region: PhantomData<&'r mut [u8]>,
}

unsafe impl Send for Fmem<'_> {}
unsafe impl Sync for Fmem<'_> {}

/// A snapshot of the accounting block's totals, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Bytes in the region.
    pub total_size: usize,
    /// Bytes currently belonging to free pages.
    pub total_available: usize,
    /// Count of busy pages other than the head.
    pub alloc_objects: usize,
}

impl<'r> Fmem<'r> {
    /// Installs a fresh allocator over `region`: a head page (carrying the
    /// accounting block as its payload) and one free tail page spanning the
    /// rest of the region.
    ///
    /// # Safety
    /// `region` must be at least 8-byte aligned (any `mmap`- or
    /// page-allocator-returned region satisfies this) and must not be
    /// interpreted as an `Fmem` region by any other live handle for as long
    /// as this one exists. The returned handle borrows `region` for its
    /// entire lifetime `'r`, so the region's backing memory must stay mapped
    /// at this address for as long as the handle is alive.
    pub unsafe fn create_new(
        region: &'r mut [u8],
        min_alloc: usize,
        committer: Option<Box<dyn Committer>>,
    ) -> Result<Self> {
        let region_len = region.len();
        if region_len < 3 * HEADER_SIZE + ACCOUNTING_SIZE {
            return Err(FmemError::TotalAllocationSizeTooSmall);
        }
        let min_alloc = min_alloc.max(HEADER_SIZE);
        if region_len < min_alloc + 2 * HEADER_SIZE + ACCOUNTING_SIZE {
            return Err(FmemError::BadInitMem);
        }

        let base = region.as_mut_ptr();
        let main_size = region_len - HEADER_SIZE - ACCOUNTING_SIZE;

        let fmem = unsafe {
            let head_ptr = base as *mut PageHeader;
            let accounting_ptr = base.add(HEADER_SIZE) as *mut AccountingRaw;
            let main_ptr = base.add(HEADER_SIZE + ACCOUNTING_SIZE) as *mut PageHeader;

            PageHeader::init(head_ptr, (HEADER_SIZE + ACCOUNTING_SIZE) as u32, true);
            PageHeader::init(main_ptr, main_size as u32, false);
            Link::add_after(&mut (*head_ptr).link as *mut Link, &mut (*main_ptr).link as *mut Link);

            AccountingRaw::init(accounting_ptr, region_len, main_size, min_alloc);

            Fmem {
                head: NonNull::new_unchecked(head_ptr),
                accounting: NonNull::new_unchecked(accounting_ptr),
                committer,
                _region: PhantomData,
            }
        };

        fmem.commit_if_installed(&[CommitRange {
            addr: base as *const u8,
            len: 2 * HEADER_SIZE + ACCOUNTING_SIZE,
        }])?;

        Ok(fmem)
    }

    /// Reopens an allocator previously written by `create_new` over the same
    /// bytes. No page or accounting field is rewritten; only the (transient)
    /// committer and the lock are reset — the lock is forced to unlocked to
    /// recover from a holder that crashed before releasing it, which is
    /// sound only when the caller knows no other process is mid-operation.
    ///
    /// # Safety
    /// `region` must hold bytes previously written by `create_new`, mapped
    /// at the same address they were created at. The returned handle
    /// borrows `region` for its entire lifetime `'r`, so the region's
    /// backing memory must stay mapped at this address for as long as the
    /// handle is alive.
    pub unsafe fn reopen(region: &'r mut [u8], committer: Option<Box<dyn Committer>>) -> Result<Self> {
        let base = region.as_mut_ptr();
        unsafe {
            let head_ptr = base as *mut PageHeader;
            poison_check(head_ptr)?;

            let accounting_ptr = base.add(HEADER_SIZE) as *mut AccountingRaw;
            (*accounting_ptr).lock.reset();

            Ok(Fmem {
                head: NonNull::new_unchecked(head_ptr),
                accounting: NonNull::new_unchecked(accounting_ptr),
                committer,
                _region: PhantomData,
            })
        }
    }

    /// Allocates at least `n` bytes, returning the payload address.
    ///
    /// Walks the page list first-fit from the head. A candidate larger than
    /// needed plus the minimum usable remainder is carved: the *tail*
    /// fragment becomes the allocation, keeping free space near the list
    /// head so the first-fit walk stays cheap while allocations churn.
    pub fn alloc(&self, n: usize) -> Result<NonNull<u8>> {
        let acct = self.accounting.as_ptr();
        unsafe {
            let _guard = (*acct).lock.lock_guard();
            let need = n.max((*acct).min_alloc);
            if (*acct).total_available < need {
                return Err(FmemError::NoMem);
            }

            let head_link = &mut (*self.head.as_ptr()).link as *mut Link;
            let mut found: Option<(*mut PageHeader, Option<*mut PageHeader>)> = None;
            for link in Link::iter_from(head_link) {
                let page = page_from_link!(link, PageHeader, link);
                poison_check(page)?;
                if (*page).is_busy() {
                    continue;
                }
                match fit(page, need) {
                    Fit::CanNotFit => continue,
                    Fit::AsIs => {
                        found = Some((page, None));
                        break;
                    }
                    Fit::WithCarve => {
                        let tail = carve(page, need);
                        found = Some((tail, Some(page)));
                        break;
                    }
                }
            }

            let (selected, carved_from) = found.ok_or(FmemError::NoMem)?;
            (*selected).set_busy(true);
            (*selected).set_magic(MAGIC_SENTINEL);
            (*acct).total_available -= (*selected).size as usize;
            (*acct).alloc_objects += 1;

            let mut ranges = [CommitRange { addr: core::ptr::null(), len: 0 }; 3];
            ranges[0] = CommitRange { addr: selected as *const u8, len: HEADER_SIZE };
            let range_count = if let Some(prev) = carved_from {
                let selected_link = &mut (*selected).link as *mut Link;
                let next = page_from_link!((*selected_link).next, PageHeader, link);
                ranges[1] = CommitRange { addr: prev as *const u8, len: HEADER_SIZE };
                ranges[2] = CommitRange { addr: next as *const u8, len: HEADER_SIZE };
                3
            } else {
                1
            };
            self.commit_if_installed(&ranges[..range_count])?;

            let payload = (selected as *mut u8).add(HEADER_SIZE);
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// Releases a payload address previously returned by [`Fmem::alloc`],
    /// coalescing with free neighbors, and returns the number of bytes freed
    /// (the releasing page's full size, including its header).
    ///
    /// # Safety
    /// `ptr` must be a payload address previously returned by `alloc` on
    /// this `Fmem` and not already freed.
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<usize> {
        let acct = self.accounting.as_ptr();
        let _guard = (*acct).lock.lock_guard();

        let page = ptr.as_ptr().sub(HEADER_SIZE) as *mut PageHeader;
        poison_check(page)?;

        let freed = (*page).size as usize;
        (*page).set_busy(false);
        let survivor = merge(page);

        (*acct).alloc_objects -= 1;
        (*acct).total_available += freed;

        let survivor_link = &mut (*survivor).link as *mut Link;
        let prev = page_from_link!((*survivor_link).prev, PageHeader, link);
        let next = page_from_link!((*survivor_link).next, PageHeader, link);
        let ranges = [
            CommitRange { addr: survivor as *const u8, len: HEADER_SIZE },
            CommitRange { addr: prev as *const u8, len: HEADER_SIZE },
            CommitRange { addr: next as *const u8, len: HEADER_SIZE },
        ];
        self.commit_if_installed(&ranges)?;

        Ok(freed)
    }

    /// Persists the four `userN` slots as a single contiguous range. No lock
    /// is taken — those slots are the client's to serialize.
    pub fn commit_user_data(&self) -> Result<usize> {
        let committer = self.committer.as_deref().ok_or(FmemError::CommitFailed)?;
        unsafe {
            poison_check(self.head.as_ptr())?;
            let user_ptr = core::ptr::addr_of!((*self.accounting.as_ptr()).user) as *const u8;
            let len = USER_SLOTS * core::mem::size_of::<u64>();
            committer
                .commit(&[CommitRange { addr: user_ptr, len }])
                .map_err(|_| {
                    log::warn!("fmem: committer rejected the user-slot range");
                    FmemError::CommitFailed
                })?;
            Ok(len)
        }
    }

    /// Persists `len` bytes of `ptr`'s payload (the whole payload if `len ==
    /// 0`), failing if the range would run past the page's payload bounds.
    ///
    /// # Safety
    /// `ptr` must be a payload address previously returned by `alloc` on
    /// this `Fmem`.
    pub unsafe fn commit_mem(&self, ptr: NonNull<u8>, mut len: usize) -> Result<usize> {
        let committer = self.committer.as_deref().ok_or(FmemError::CommitFailed)?;
        let page = ptr.as_ptr().sub(HEADER_SIZE) as *mut PageHeader;
        poison_check(page)?;

        let avail = actual(page);
        if len == 0 {
            len = avail;
        }
        if len > avail {
            return Err(FmemError::CommitFailed);
        }

        committer
            .commit(&[CommitRange { addr: ptr.as_ptr(), len }])
            .map_err(|_| {
                log::warn!("fmem: committer rejected a commit_mem range of {len} byte(s)");
                FmemError::CommitFailed
            })?;
        Ok(len)
    }

    /// A cheap, unlocked snapshot of the region's totals.
    pub fn stats(&self) -> Stats {
        unsafe {
            let acct = self.accounting.as_ptr();
            Stats {
                total_size: (*acct).total_size,
                total_available: (*acct).total_available,
                alloc_objects: (*acct).alloc_objects,
            }
        }
    }

    /// Reads one of the four opaque client root-pointer slots.
    pub fn user(&self, slot: usize) -> u64 {
        unsafe { (*self.accounting.as_ptr()).user[slot] }
    }

    /// Writes one of the four opaque client root-pointer slots.
    pub fn set_user(&self, slot: usize, value: u64) {
        unsafe { (*self.accounting.as_ptr()).user[slot] = value };
    }

    fn commit_if_installed(&self, ranges: &[CommitRange]) -> Result<()> {
        if let Some(committer) = &self.committer {
            committer.commit(ranges).map_err(|_| {
                log::warn!(
                    "fmem: committer rejected {} range(s); fmem state is now unrecoverable",
                    ranges.len()
                );
                FmemError::CommitFailed
            })?;
        }
        Ok(())
    }
}

//! Shared plumbing for the demo CLIs: the `mmap`/`msync` machinery that
//! produces a fixed region and implements its committer. Per the crate's
//! scope, this is glue around `Fmem`, not part of the allocator itself.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;

use nos_fmem::{CommitFailure, CommitRange, Committer};

/// A region backed by an open file descriptor, mapped `MAP_SHARED` so every
/// writer (including `msync`) observes the same bytes.
pub struct MappedRegion {
    pub base: *mut u8,
    pub len: usize,
    fd: RawFd,
}

impl MappedRegion {
    /// Maps `len` bytes of `fd` at whatever address the kernel chooses.
    /// `fd` must already be sized to at least `len` (via `ftruncate`).
    pub fn map(fd: RawFd, len: usize) -> std::io::Result<Self> {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { base: base as *mut u8, len, fd })
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

/// Page size, read once via `sysconf`. Used to align `msync` ranges — the
/// committer, not `Fmem`, owns this responsibility per the committer
/// contract.
pub fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 { 4096 } else { sz as usize }
}

/// A [`Committer`] that flushes dirtied ranges with `msync`, page-aligning
/// each range outward since `msync` requires page-aligned addresses.
pub struct MsyncCommitter {
    base: usize,
    region_len: usize,
    page_size: usize,
}

impl MsyncCommitter {
    pub fn new(base: *mut u8, region_len: usize) -> Self {
        Self { base: base as usize, region_len, page_size: page_size() }
    }

    fn aligned_span(&self, addr: *const u8, len: usize) -> (*mut libc::c_void, usize) {
        let start = addr as usize;
        let page_start = start & !(self.page_size - 1);
        let end = (start + len).min(self.base + self.region_len);
        let page_end = (end + self.page_size - 1) & !(self.page_size - 1);
        (page_start as *mut libc::c_void, page_end - page_start)
    }
}

impl Committer for MsyncCommitter {
    fn commit(&self, ranges: &[CommitRange]) -> Result<(), CommitFailure> {
        for range in ranges {
            let (addr, len) = self.aligned_span(range.addr, range.len);
            let rc = unsafe { libc::msync(addr, len, libc::MS_SYNC) };
            if rc != 0 {
                log::warn!("fmem-demo: msync failed for range at {:p} ({} bytes)", addr, len);
                return Err(CommitFailure);
            }
        }
        Ok(())
    }
}

/// Opens (creating if needed) a backing fd sized to at least `len`.
pub fn open_sized(path: &CString, len: usize, oflag: libc::c_int) -> std::io::Result<RawFd> {
    let fd = unsafe { libc::open(path.as_ptr(), oflag, 0o600) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

/// A fixed-size sample payload stored in an allocated page, used to exercise
/// a round trip across `-i` and `-r` invocations. Stands in for the
/// "things" object graph the source's demos use to validate persistence —
/// the graph itself is a fixture, not part of the allocator's contract.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleThing {
    pub tag: u32,
    pub value: u64,
}

impl SampleThing {
    pub const SIZE: usize = core::mem::size_of::<SampleThing>();

    pub fn write_into(self, dst: *mut u8) {
        unsafe { (dst as *mut SampleThing).write(self) };
    }

    /// # Safety
    /// `src` must point to a previously-written `SampleThing`.
    pub unsafe fn read_from(src: *const u8) -> SampleThing {
        unsafe { (src as *const SampleThing).read() }
    }
}

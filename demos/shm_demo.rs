//! Demonstrates `Fmem` over a POSIX shared-memory object: create, reopen,
//! and destroy modes selected by a single flag, matching the source's
//! `-i`/`-r`/`-c` CLI convention. Glue around the allocator, not part of its
//! contract.

#[path = "common.rs"]
mod common;

use std::ffi::CString;
use std::process::ExitCode;

use common::{MappedRegion, MsyncCommitter, SampleThing};
use nos_fmem::Fmem;

const SHM_NAME: &str = "/nos-fmem-demo";
const REGION_LEN: usize = 64 * 1024;

fn usage() -> ! {
    eprintln!("usage: fmem-shm-demo [-i | -r | -c]");
    eprintln!("  -i  create the shared-memory object and initialize an fmem region");
    eprintln!("  -r  reopen the region and verify the sample payload round-trips");
    eprintln!("  -c  unlink the shared-memory object");
    std::process::exit(2);
}

fn shm_name() -> CString {
    CString::new(SHM_NAME).expect("static name has no interior NUL")
}

fn mode_init() -> std::io::Result<()> {
    let fd = unsafe { libc::shm_open(shm_name().as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::ftruncate(fd, REGION_LEN as libc::off_t) } != 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let mut region = MappedRegion::map(fd, REGION_LEN)?;
    let base = region.base;
    let committer = MsyncCommitter::new(base, REGION_LEN);

    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), 64, Some(Box::new(committer))) }
        .unwrap_or_else(|e| {
            eprintln!("fmem-shm-demo: create_new failed: {e}");
            std::process::exit(1);
        });

    let payload = unsafe { fmem.alloc(SampleThing::SIZE) }.unwrap_or_else(|e| {
        eprintln!("fmem-shm-demo: alloc failed: {e}");
        std::process::exit(1);
    });
    SampleThing { tag: 0xF00D, value: 42 }.write_into(payload.as_ptr());
    unsafe { fmem.commit_mem(payload, 0) }.unwrap_or_else(|e| {
        eprintln!("fmem-shm-demo: commit_mem failed: {e}");
        std::process::exit(1);
    });

    fmem.set_user(0, payload.as_ptr() as u64);
    fmem.commit_user_data().unwrap_or_else(|e| {
        eprintln!("fmem-shm-demo: commit_user_data failed: {e}");
        std::process::exit(1);
    });

    println!("fmem-shm-demo: initialized {SHM_NAME} ({REGION_LEN} bytes)");
    Ok(())
}

fn mode_reopen() -> std::io::Result<()> {
    let fd = unsafe { libc::shm_open(shm_name().as_ptr(), libc::O_RDWR, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut region = MappedRegion::map(fd, REGION_LEN)?;
    let base = region.base;
    let committer = MsyncCommitter::new(base, REGION_LEN);

    let fmem = unsafe { Fmem::reopen(region.as_slice_mut(), Some(Box::new(committer))) }
        .unwrap_or_else(|e| {
            eprintln!("fmem-shm-demo: reopen failed: {e}");
            std::process::exit(1);
        });

    let root = fmem.user(0) as *const u8;
    let thing = unsafe { SampleThing::read_from(root) };
    if thing == (SampleThing { tag: 0xF00D, value: 42 }) {
        println!("fmem-shm-demo: round-trip ok: {thing:?}");
        Ok(())
    } else {
        eprintln!("fmem-shm-demo: round-trip mismatch: {thing:?}");
        std::process::exit(1);
    }
}

fn mode_cleanup() -> std::io::Result<()> {
    if unsafe { libc::shm_unlink(shm_name().as_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    println!("fmem-shm-demo: unlinked {SHM_NAME}");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let mode = std::env::args().nth(1).unwrap_or_else(|| usage());

    let result = match mode.as_str() {
        "-i" => mode_init(),
        "-r" => mode_reopen(),
        "-c" => mode_cleanup(),
        _ => usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fmem-shm-demo: {e}");
            ExitCode::FAILURE
        }
    }
}

//! Demonstrates `Fmem` over a plain file mapping instead of POSIX shared
//! memory — the same region contract, a different backing store. Glue
//! around the allocator, not part of its contract.

#[path = "common.rs"]
mod common;

use std::ffi::CString;
use std::process::ExitCode;

use common::{open_sized, MappedRegion, MsyncCommitter, SampleThing};
use nos_fmem::Fmem;

const FILE_PATH: &str = "/tmp/nos-fmem-demo.region";
const REGION_LEN: usize = 64 * 1024;

fn usage() -> ! {
    eprintln!("usage: fmem-file-demo [-i | -r | -c]");
    eprintln!("  -i  create the backing file and initialize an fmem region");
    eprintln!("  -r  reopen the region and verify the sample payload round-trips");
    eprintln!("  -c  remove the backing file");
    std::process::exit(2);
}

fn path() -> CString {
    CString::new(FILE_PATH).expect("static path has no interior NUL")
}

fn mode_init() -> std::io::Result<()> {
    let fd = open_sized(&path(), REGION_LEN, libc::O_CREAT | libc::O_RDWR)?;
    let mut region = MappedRegion::map(fd, REGION_LEN)?;
    let base = region.base;
    let committer = MsyncCommitter::new(base, REGION_LEN);

    let fmem = unsafe { Fmem::create_new(region.as_slice_mut(), 64, Some(Box::new(committer))) }
        .unwrap_or_else(|e| {
            eprintln!("fmem-file-demo: create_new failed: {e}");
            std::process::exit(1);
        });

    let payload = unsafe { fmem.alloc(SampleThing::SIZE) }.unwrap_or_else(|e| {
        eprintln!("fmem-file-demo: alloc failed: {e}");
        std::process::exit(1);
    });
    SampleThing { tag: 0xF00D, value: 7 }.write_into(payload.as_ptr());
    unsafe { fmem.commit_mem(payload, 0) }.unwrap_or_else(|e| {
        eprintln!("fmem-file-demo: commit_mem failed: {e}");
        std::process::exit(1);
    });

    fmem.set_user(0, payload.as_ptr() as u64);
    fmem.commit_user_data().unwrap_or_else(|e| {
        eprintln!("fmem-file-demo: commit_user_data failed: {e}");
        std::process::exit(1);
    });

    println!("fmem-file-demo: initialized {FILE_PATH} ({REGION_LEN} bytes)");
    Ok(())
}

fn mode_reopen() -> std::io::Result<()> {
    let fd = open_sized(&path(), REGION_LEN, libc::O_RDWR)?;
    let mut region = MappedRegion::map(fd, REGION_LEN)?;
    let base = region.base;
    let committer = MsyncCommitter::new(base, REGION_LEN);

    let fmem = unsafe { Fmem::reopen(region.as_slice_mut(), Some(Box::new(committer))) }
        .unwrap_or_else(|e| {
            eprintln!("fmem-file-demo: reopen failed: {e}");
            std::process::exit(1);
        });

    let root = fmem.user(0) as *const u8;
    let thing = unsafe { SampleThing::read_from(root) };
    if thing == (SampleThing { tag: 0xF00D, value: 7 }) {
        println!("fmem-file-demo: round-trip ok: {thing:?}");
        Ok(())
    } else {
        eprintln!("fmem-file-demo: round-trip mismatch: {thing:?}");
        std::process::exit(1);
    }
}

fn mode_cleanup() -> std::io::Result<()> {
    std::fs::remove_file(FILE_PATH)?;
    println!("fmem-file-demo: removed {FILE_PATH}");
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
            eprintln!("fmem-file-demo: {e}");
            ExitCode::FAILURE
        }
    }
}

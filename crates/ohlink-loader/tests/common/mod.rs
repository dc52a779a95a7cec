#![allow(dead_code)]

use std::io::Write;
use std::ptr;

use ohlink_format::OhlinkBuilder;
use ohlink_loader::page::host_page_size;

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8 + 1).collect()
}

/// Finds `pages` of free address space and gives it back to the kernel,
/// leaving the range unmapped for the segments to fault into.
pub fn free_range(pages: usize) -> usize {
    let len = pages * host_page_size();
    unsafe {
        let p = libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        assert_ne!(p, libc::MAP_FAILED);
        assert_eq!(libc::munmap(p, len), 0);
        p as usize
    }
}

pub fn write_image(b: OhlinkBuilder) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&b.build()).unwrap();
    file.flush().unwrap();
    file
}

pub fn read(addr: usize) -> u8 {
    unsafe { ptr::read_volatile(addr as *const u8) }
}

pub fn write(addr: usize, value: u8) {
    unsafe { ptr::write_volatile(addr as *mut u8, value) }
}

/// Runs `touch(addr)` in a forked child and returns its wait status.
/// A child that survives the touch exits with status 0.
pub fn in_child(touch: fn(usize), addr: usize) -> libc::c_int {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        touch(addr);
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    status
}

/// Asserts the child running `touch(addr)` dies of `SIGSEGV`.
pub fn dies_with_segv(touch: fn(usize), addr: usize) {
    let status = in_child(touch, addr);
    assert!(libc::WIFSIGNALED(status), "child at {:#x} exited with status {:#x}", addr, status);
    assert_eq!(libc::WTERMSIG(status), libc::SIGSEGV);
}

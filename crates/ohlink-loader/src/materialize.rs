//! Strategies for putting a single page in place.
//!
//! The resolver decides *what* a page must contain ([`PagePlan`]); a
//! [`Materializer`] decides *how* the host gets it there. Two strategies
//! exist:
//!
//! - [`CopyIn`] maps an anonymous writable page, reads the file-backed
//!   prefix into it and then tightens protection. It works for any file
//!   offset.
//! - [`MapFile`] maps the file directly with its final protection. The
//!   host only maps files at page-aligned offsets, so it is chosen only when
//!   every segment's file offset allows it.
//!
//! Both leave the same bytes behind: file content for the covered prefix,
//! zero for the rest.

use std::io;
use std::os::unix::io::AsRawFd;

use libc::{c_int, c_void};
use log::debug;

use crate::config::Backend;
use crate::error::{LoaderError, MapError, Result};
use crate::page::{PageFill, PagePlan};
use crate::prot::NativeProt;
use crate::segment::SegmentTable;
use crate::source::BackingFile;

pub trait Materializer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Maps `plan.addr..plan.addr + plan.len` with the content described by
    /// `plan` and leaves it with protection `prot`.
    fn materialize_page(
        &self,
        plan: &PagePlan,
        source: &BackingFile,
        prot: NativeProt,
    ) -> std::result::Result<(), MapError>;
}

/// Anonymous page, copy the file bytes in, then restrict protection.
#[derive(Debug, Default)]
pub struct CopyIn;

impl Materializer for CopyIn {
    fn name(&self) -> &'static str {
        "copy-in"
    }

    fn materialize_page(
        &self,
        plan: &PagePlan,
        source: &BackingFile,
        prot: NativeProt,
    ) -> std::result::Result<(), MapError> {
        if plan.fill == PageFill::Zero {
            return map_zero(plan, prot);
        }

        map_fixed(plan, NativeProt::SCRATCH, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)?;
        copy_file_prefix(plan, source, prot).map_err(|e| {
            unmap(plan);
            e
        })
    }
}

fn copy_file_prefix(
    plan: &PagePlan,
    source: &BackingFile,
    prot: NativeProt,
) -> std::result::Result<(), MapError> {
    // 匿名页本身全零，只需拷贝文件部分
    let page = unsafe { page_bytes(plan) };
    source.read_exact_at(plan.file_pos, &mut page[..plan.file_len()])?;
    if prot != NativeProt::SCRATCH {
        protect(plan, prot)?;
    }
    Ok(())
}

/// Private file mapping at the page's file position.
#[derive(Debug, Default)]
pub struct MapFile;

impl Materializer for MapFile {
    fn name(&self) -> &'static str {
        "map-file"
    }

    fn materialize_page(
        &self,
        plan: &PagePlan,
        source: &BackingFile,
        prot: NativeProt,
    ) -> std::result::Result<(), MapError> {
        let fd = source.as_raw_fd();
        match plan.fill {
            PageFill::Zero => map_zero(plan, prot),
            _ if plan.file_pos % plan.len as u64 != 0 => Err(MapError::Unaligned { pos: plan.file_pos }),
            PageFill::File => map_fixed(plan, prot, libc::MAP_PRIVATE, fd, plan.file_pos),
            PageFill::Partial { file_len } => {
                // 一次 mmap 无法同时得到“文件前缀 + 零尾”和最终权限：先可写映射，清零，再收紧
                map_fixed(plan, NativeProt::SCRATCH, libc::MAP_PRIVATE, fd, plan.file_pos)?;
                let page = unsafe { page_bytes(plan) };
                page[file_len..].fill(0);
                if prot != NativeProt::SCRATCH {
                    protect(plan, prot).map_err(|e| {
                        unmap(plan);
                        e
                    })?;
                }
                Ok(())
            }
        }
    }
}

/// Picks the strategy for `table`.
pub fn select(choice: Backend, table: &SegmentTable) -> Result<Box<dyn Materializer>> {
    let page_size = table.page_size() as u64;
    let unaligned = table
        .segments()
        .iter()
        .find(|s| s.file_size > 0 && s.file_offset % page_size != 0);

    let backend: Box<dyn Materializer> = match (choice, unaligned) {
        (Backend::CopyIn, _) => Box::new(CopyIn),
        (Backend::MapFile, Some(seg)) => {
            return Err(LoaderError::BackendUnsupported { segment: seg.index, offset: seg.file_offset });
        }
        (Backend::MapFile, None) | (Backend::Auto, None) => Box::new(MapFile),
        (Backend::Auto, Some(seg)) => {
            debug!("segment {} has unaligned file offset {:#x}, copying pages in", seg.index, seg.file_offset);
            Box::new(CopyIn)
        }
    };
    Ok(backend)
}

fn map_fixed(
    plan: &PagePlan,
    prot: NativeProt,
    flags: c_int,
    fd: c_int,
    offset: u64,
) -> std::result::Result<(), MapError> {
    let got = unsafe {
        libc::mmap(
            plan.addr as *mut c_void,
            plan.len,
            prot.bits(),
            flags | libc::MAP_FIXED,
            fd,
            offset as libc::off_t,
        )
    };
    if got == libc::MAP_FAILED {
        return Err(MapError::Map { addr: plan.addr, len: plan.len, source: io::Error::last_os_error() });
    }
    check_placement(plan, got)
}

/// Releases a mapping that did not land at `plan.addr`.
fn check_placement(plan: &PagePlan, got: *mut c_void) -> std::result::Result<(), MapError> {
    if got as usize != plan.addr {
        unsafe { libc::munmap(got, plan.len) };
        return Err(MapError::Misplaced { addr: plan.addr, got: got as usize });
    }
    Ok(())
}

fn map_zero(plan: &PagePlan, prot: NativeProt) -> std::result::Result<(), MapError> {
    map_fixed(plan, prot, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
}

fn protect(plan: &PagePlan, prot: NativeProt) -> std::result::Result<(), MapError> {
    let rc = unsafe { libc::mprotect(plan.addr as *mut c_void, plan.len, prot.bits()) };
    if rc != 0 {
        return Err(MapError::Protect { addr: plan.addr, source: io::Error::last_os_error() });
    }
    Ok(())
}

fn unmap(plan: &PagePlan) {
    unsafe {
        libc::munmap(plan.addr as *mut c_void, plan.len);
    }
}

/// # Safety
/// `plan` must describe a page that is currently mapped writable.
unsafe fn page_bytes<'a>(plan: &PagePlan) -> &'a mut [u8] {
    std::slice::from_raw_parts_mut(plan.addr as *mut u8, plan.len)
}

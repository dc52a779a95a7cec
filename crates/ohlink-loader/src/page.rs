//! Page-granular arithmetic for a faulting page.

use crate::segment::Segment;

/// Host page size.
pub fn host_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

#[inline]
pub fn align_down(addr: usize, page_size: usize) -> usize {
    addr & !(page_size - 1)
}

/// How a page relates to the file-backed part of its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFill {
    /// Entirely past `file_size`; never read from the file.
    Zero,
    /// Entirely covered by file content.
    File,
    /// File content ends `file_len` bytes into the page.
    Partial { file_len: usize },
}

/// Everything needed to put one page of a segment in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub addr: usize,
    pub len: usize,
    pub file_pos: u64,
    pub fill: PageFill,
}

impl PagePlan {
    pub fn for_page(segment: &Segment, index: usize, page_size: usize) -> Self {
        let offset = index * page_size;
        let fill = if offset >= segment.file_size {
            PageFill::Zero
        } else if offset + page_size <= segment.file_size {
            PageFill::File
        } else {
            PageFill::Partial { file_len: segment.file_size - offset }
        };

        Self {
            addr: segment.base_address + offset,
            len: page_size,
            file_pos: segment.file_offset + offset as u64,
            fill,
        }
    }

    /// Bytes that come from the file.
    pub fn file_len(&self) -> usize {
        match self.fill {
            PageFill::Zero => 0,
            PageFill::File => self.len,
            PageFill::Partial { file_len } => file_len,
        }
    }

    /// Bytes at the end of the page that must read as zero.
    pub fn zero_len(&self) -> usize {
        self.len - self.file_len()
    }
}

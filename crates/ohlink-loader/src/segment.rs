//! Segment table: which address ranges belong to the image and which of
//! their pages are already resident.

use std::sync::atomic::{AtomicBool, Ordering};

use ohlink_format::{ExecImage, ImageSegment, SegPerms};

use crate::error::{LoaderError, Result};

#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub name: String,
    pub base_address: usize,
    pub file_offset: u64,
    pub file_size: usize,
    pub memory_size: usize,
    pub permissions: SegPerms,
    // 每页一个标志，只会从 false 变为 true
    residency: Box<[AtomicBool]>,
}

impl Segment {
    fn new(index: usize, seg: &ImageSegment, page_size: usize) -> Result<Self> {
        if seg.base_address % page_size as u64 != 0 {
            return Err(LoaderError::Misaligned {
                segment: index,
                name: seg.name.clone(),
                base: seg.base_address,
                page_size,
            });
        }

        let out_of_range = || LoaderError::AddressRange { segment: index, name: seg.name.clone() };
        let base_address = usize::try_from(seg.base_address).map_err(|_| out_of_range())?;
        let memory_size = usize::try_from(seg.memory_size).map_err(|_| out_of_range())?;
        let file_size = usize::try_from(seg.file_size).map_err(|_| out_of_range())?;
        let pages = memory_size.div_ceil(page_size);
        pages
            .checked_mul(page_size)
            .and_then(|len| base_address.checked_add(len))
            .ok_or_else(out_of_range)?;

        Ok(Self {
            index,
            name: seg.name.clone(),
            base_address,
            file_offset: seg.file_offset,
            file_size,
            memory_size,
            permissions: seg.permissions,
            residency: (0..pages).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn end_address(&self) -> usize {
        self.base_address + self.memory_size
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    pub fn page_count(&self) -> usize {
        self.residency.len()
    }
}

#[derive(Debug)]
pub struct SegmentTable {
    segments: Vec<Segment>,
    page_size: usize,
}

impl SegmentTable {
    pub fn new(image: &ExecImage, page_size: usize) -> Result<Self> {
        let segments = image
            .segments
            .iter()
            .enumerate()
            .map(|(i, seg)| Segment::new(i, seg, page_size))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments, page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Linear scan; images carry a handful of segments.
    pub fn find_segment(&self, address: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(address))
    }

    pub fn page_index(&self, segment: &Segment, address: usize) -> usize {
        (address - segment.base_address) / self.page_size
    }

    pub fn is_resident(&self, segment: &Segment, page: usize) -> bool {
        segment.residency[page].load(Ordering::Acquire)
    }

    /// Flags a page as materialized. A page that is already resident means
    /// the single-resolution invariant is broken, which is fatal.
    pub fn mark_resident(&self, segment: &Segment, page: usize) -> Result<()> {
        if segment.residency[page].swap(true, Ordering::AcqRel) {
            return Err(LoaderError::DoubleResolution { segment: segment.index, page });
        }
        Ok(())
    }

    pub fn resident_pages(&self) -> usize {
        self.segments
            .iter()
            .flat_map(|s| s.residency.iter())
            .filter(|r| r.load(Ordering::Relaxed))
            .count()
    }
}

//! Turns a fault inside a known segment into a resident page.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace};

use crate::error::{LoaderError, Result};
use crate::materialize::Materializer;
use crate::page::{PageFill, PagePlan};
use crate::prot;
use crate::segment::SegmentTable;
use crate::source::BackingFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Nothing is mapped at the address.
    Unmapped,
    /// Something is mapped but the access is not allowed.
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub addr: usize,
    pub kind: FaultKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The page is in place; retry the access.
    Handled,
    /// Not an image page fault; hand it to whoever handled faults before us.
    Foreign,
}

#[derive(Debug, Default)]
struct Counters {
    zero: AtomicUsize,
    file: AtomicUsize,
    partial: AtomicUsize,
    foreign: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub zero_pages: usize,
    pub file_pages: usize,
    pub partial_pages: usize,
    pub foreign_faults: usize,
}

impl ResolverStats {
    pub fn resolved(&self) -> usize {
        self.zero_pages + self.file_pages + self.partial_pages
    }
}

pub struct PageResolver {
    table: SegmentTable,
    source: BackingFile,
    backend: Box<dyn Materializer>,
    counters: Counters,
}

impl PageResolver {
    pub fn new(table: SegmentTable, source: BackingFile, backend: Box<dyn Materializer>) -> Self {
        Self { table, source, backend, counters: Counters::default() }
    }

    pub fn table(&self) -> &SegmentTable {
        &self.table
    }

    /// Executable the pages come from.
    pub fn image_path(&self) -> &Path {
        self.source.path()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            zero_pages: self.counters.zero.load(Ordering::Relaxed),
            file_pages: self.counters.file.load(Ordering::Relaxed),
            partial_pages: self.counters.partial.load(Ordering::Relaxed),
            foreign_faults: self.counters.foreign.load(Ordering::Relaxed),
        }
    }

    /// Resolves one fault. `Ok(Foreign)` means the fault is not ours;
    /// any `Err` is fatal to the process.
    pub fn resolve(&self, fault: &Fault) -> Result<Resolution> {
        // 1. 找段；越界访问或对已映射页的权限错误都不归我们处理
        let segment = match (fault.kind, self.table.find_segment(fault.addr)) {
            (FaultKind::Unmapped, Some(segment)) => segment,
            _ => return Ok(self.foreign(fault)),
        };

        let index = self.table.page_index(segment, fault.addr);
        if self.table.is_resident(segment, index) {
            return Ok(self.foreign(fault));
        }

        // 2. 页对齐区域、文件偏移与零填充划分
        let plan = PagePlan::for_page(segment, index, self.table.page_size());
        let prot = prot::translate(segment.permissions);

        // 3. 映射并设置最终权限，全部成功后才标记驻留
        self.backend
            .materialize_page(&plan, &self.source, prot)
            .map_err(|source| LoaderError::PageFault {
                addr: fault.addr,
                segment: segment.index,
                page: index,
                source,
            })?;
        self.table.mark_resident(segment, index)?;

        let counter = match plan.fill {
            PageFill::Zero => &self.counters.zero,
            PageFill::File => &self.counters.file,
            PageFill::Partial { .. } => &self.counters.partial,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(
            "fault at {:#x}: {} page {} at {:#x} ({:?}, {:?}) via {}",
            fault.addr,
            segment.name,
            index,
            plan.addr,
            plan.fill,
            prot,
            self.backend.name()
        );
        Ok(Resolution::Handled)
    }

    fn foreign(&self, fault: &Fault) -> Resolution {
        self.counters.foreign.fetch_add(1, Ordering::Relaxed);
        trace!("passing on {:?} fault at {:#x}", fault.kind, fault.addr);
        Resolution::Foreign
    }
}

// crates/ohlink-loader/src/lib.rs
//! Demand-paging loader for Ohlink executables.
//!
//! Nothing of the image is mapped up front. The loader installs a
//! `SIGSEGV` handler and jumps to the entry point; every first touch of a
//! page inside a segment faults, and the handler maps exactly that page
//! from the executable (zero-filling whatever lies past the segment's file
//! content) before letting the access run again.

#[cfg(not(unix))]
compile_error!("ohlink-loader relies on POSIX signals and mmap");

pub mod config;
pub mod error;
pub mod fault;
pub mod launch;
pub mod materialize;
pub mod page;
pub mod prot;
pub mod resolver;
pub mod segment;
pub mod source;

use std::convert::Infallible;
use std::ffi::OsString;
use std::path::Path;

use log::{info, warn};
use ohlink_format::{ExecImage, NOTE_ABI_VERSION};

pub use config::{Backend, LoaderConfig};
pub use error::{LaunchError, LoaderError, MapError, Result};
pub use fault::{FaultInterceptor, InterceptorState};
pub use launch::{Launcher, NativeLauncher};
pub use resolver::{Fault, FaultKind, PageResolver, Resolution, ResolverStats};
pub use segment::SegmentTable;

pub struct LazyLoader {
    config: LoaderConfig,
}

impl LazyLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Parses the image and builds everything the fault handler needs,
    /// without installing it.
    pub fn prepare(&self, path: &Path) -> Result<(ExecImage, PageResolver)> {
        // 1. 解析镜像
        let image = ohlink_format::image::parse(path)?;
        match image.abi_version {
            Some(NOTE_ABI_VERSION) => {}
            Some(v) => return Err(LoaderError::UnsupportedAbi(v)),
            None if self.config.require_abi_note => return Err(LoaderError::MissingAbiNote),
            None => warn!("{}: no ABI note, loading anyway", path.display()),
        }

        // 2. 文件句柄在进程生命周期内一直保持打开
        let source = source::BackingFile::open(path)
            .map_err(|source| LoaderError::Io { path: path.to_path_buf(), source })?;

        // 3. 段表与映射策略
        let table = SegmentTable::new(&image, page::host_page_size())?;
        let backend = materialize::select(self.config.backend, &table)?;
        for seg in table.segments() {
            info!(
                "segment {} {:<12} {:#014x}..{:#014x} file {:#x}+{:#x} {:?}",
                seg.index,
                seg.name,
                seg.base_address,
                seg.end_address(),
                seg.file_offset,
                seg.file_size,
                seg.permissions
            );
        }

        Ok((image, PageResolver::new(table, source, backend)))
    }

    /// Loads and runs the program at `path`. Returns only on failure.
    pub fn execute(&self, path: &Path, argv: &[OsString], launcher: &dyn Launcher) -> Result<Infallible> {
        let (image, resolver) = self.prepare(path)?;
        FaultInterceptor::install(resolver)?;
        Ok(launcher.start(&image, argv)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ohlink_format::{OhlinkBuilder, MH_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
    use std::io::Write;

    fn write_image(b: OhlinkBuilder) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&b.build()).unwrap();
        f.flush().unwrap();
        f
    }

    fn builder(align: u64) -> OhlinkBuilder {
        let page = page::host_page_size() as u64;
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.segment_file_align(align);
        b.add_segment("__DATA", 0x7000_0000 * page / 0x1000)
            .prot(VM_PROT_READ | VM_PROT_WRITE)
            .add_section("__data", &[1, 2, 3], 0)
            .add_section_with("__bss", &[], 0x10, 3 * page);
        b
    }

    #[test]
    fn prepare_builds_table_and_picks_backend() {
        let page = page::host_page_size();
        let f = write_image(builder(page as u64));
        let (image, resolver) = LazyLoader::new(LoaderConfig::default()).prepare(f.path()).unwrap();

        assert_eq!(image.segments.len(), 1);
        assert_eq!(resolver.backend_name(), "map-file");
        assert_eq!(resolver.image_path(), f.path());
        let seg = &resolver.table().segments()[0];
        assert_eq!(seg.file_size, 3);
        assert_eq!(seg.page_count(), 4);
        assert_eq!(resolver.table().resident_pages(), 0);
    }

    #[test]
    fn unaligned_image_falls_back_or_fails_when_forced() {
        let f = write_image(builder(0));

        let auto = LazyLoader::new(LoaderConfig::default()).prepare(f.path()).unwrap();
        assert_eq!(auto.1.backend_name(), "copy-in");

        let forced = LoaderConfig { backend: Backend::MapFile, ..LoaderConfig::default() };
        let loader = LazyLoader::new(forced);
        assert_eq!(loader.config().backend, Backend::MapFile);
        let err = loader.prepare(f.path()).err().unwrap();
        assert!(matches!(err, LoaderError::BackendUnsupported { segment: 0, .. }));
    }

    #[test]
    fn abi_note_can_be_required() {
        let mut b = builder(0);
        b.abi_note(false);
        let f = write_image(b);

        assert!(LazyLoader::new(LoaderConfig::default()).prepare(f.path()).is_ok());
        let strict = LoaderConfig { require_abi_note: true, ..LoaderConfig::default() };
        let err = LazyLoader::new(strict).prepare(f.path()).err().unwrap();
        assert!(matches!(err, LoaderError::MissingAbiNote));
    }

    #[test]
    fn missing_file_is_an_image_error() {
        let err = LazyLoader::new(LoaderConfig::default())
            .prepare(Path::new("/nonexistent/prog.ohlink"))
            .err()
            .unwrap();
        assert!(matches!(err, LoaderError::Image(_)));
    }
}

use std::io;
use std::path::PathBuf;

use ohlink_format::OhlinkError;
use thiserror::Error;

/// Failure while putting a single page in place.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("mmap of {len:#x} bytes at {addr:#x} failed: {source}")]
    Map { addr: usize, len: usize, source: io::Error },
    #[error("mapping requested at {addr:#x} landed at {got:#x}")]
    Misplaced { addr: usize, got: usize },
    #[error("mprotect at {addr:#x} failed: {source}")]
    Protect { addr: usize, source: io::Error },
    #[error("reading {len} bytes at file offset {pos:#x} failed: {source}")]
    Read { pos: u64, len: usize, source: io::Error },
    #[error("short read at file offset {pos:#x}: wanted {expected} bytes, got {got}")]
    ShortRead { pos: u64, expected: usize, got: usize },
    #[error("file offset {pos:#x} is not page-aligned")]
    Unaligned { pos: u64 },
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("image is built for cpu type {image:#x}, host is {host:?}")]
    ArchMismatch { image: u32, host: Option<u32> },
    #[error("launching is not supported on {0}")]
    Unsupported(&'static str),
    #[error("failed to allocate the initial stack: {0}")]
    Stack(#[source] io::Error),
    #[error("initial stack needs {needed} bytes but only {available} are available")]
    StackTooSmall { needed: usize, available: usize },
    #[error("argument or environment entry contains a NUL byte: {0:?}")]
    Argument(String),
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to parse image: {0}")]
    Image(#[from] OhlinkError),
    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("segment {segment} ({name}) base {base:#x} is not aligned to the {page_size:#x}-byte page")]
    Misaligned { segment: usize, name: String, base: u64, page_size: usize },
    #[error("segment {segment} ({name}) does not fit the host address space")]
    AddressRange { segment: usize, name: String },
    #[error("image carries no ABI note")]
    MissingAbiNote,
    #[error("unsupported ABI version {0}")]
    UnsupportedAbi(u32),
    #[error("map-file backend needs page-aligned file offsets, segment {segment} starts at {offset:#x}")]
    BackendUnsupported { segment: usize, offset: u64 },
    #[error("failed to materialize page {page} of segment {segment} for fault at {addr:#x}: {source}")]
    PageFault { addr: usize, segment: usize, page: usize, source: MapError },
    #[error("page {page} of segment {segment} resolved twice")]
    DoubleResolution { segment: usize, page: usize },
    #[error("fault interceptor is already installed")]
    AlreadyInstalled,
    #[error("failed to install fault handler: {0}")]
    Install(#[source] io::Error),
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

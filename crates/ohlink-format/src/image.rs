// crates/ohlink-format/src/image.rs
//! Loader-facing description of an Ohlink executable.
//!
//! [`parse`] reads only the header, the load command area and the symbol
//! table from disk. Segment payloads stay in the file until a loader asks
//! for them.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    parse_nlists, read_cstr, OhlinkError, OhlinkFile, OhlinkHeader, Result, SegmentCommand64,
    HEADER_SIZE, MH_EXECUTE, NLIST_SIZE, VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE,
};

bitflags! {
    /// Access rights a segment asks for.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SegPerms: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl SegPerms {
    pub fn from_vm_prot(prot: i32) -> Self {
        let mut perms = SegPerms::empty();
        if prot & VM_PROT_READ != 0 { perms |= SegPerms::READ; }
        if prot & VM_PROT_WRITE != 0 { perms |= SegPerms::WRITE; }
        if prot & VM_PROT_EXECUTE != 0 { perms |= SegPerms::EXECUTE; }
        perms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSegment {
    pub name: String,
    pub base_address: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub permissions: SegPerms,
}

impl ImageSegment {
    pub fn end_address(&self) -> u64 {
        self.base_address + self.memory_size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }
}

#[derive(Debug, Clone)]
pub struct ExecImage {
    pub cpu_type: u32,
    pub entry: u64,
    pub abi_version: Option<u32>,
    pub segments: Vec<ImageSegment>,
}

/// Parses the executable at `path` into an [`ExecImage`].
pub fn parse(path: impl AsRef<Path>) -> Result<ExecImage> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut header_bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_bytes).map_err(|e| short_read(e, 0, "header"))?;
    let header = OhlinkHeader::from_bytes(&header_bytes)?;
    header.validate()?;

    // 长度字段都来自文件本身，分配前先与文件大小比对
    let prefix = read_range(&mut file, 0, header.commands_end(), file_len, "load commands")?;
    let oh = OhlinkFile::parse(&prefix)?;

    let symbols = match oh.symtab() {
        Some(sym) if sym.nsyms > 0 => {
            let table_len = sym.nsyms as u64 * NLIST_SIZE as u64;
            let nlists = read_range(&mut file, sym.symoff as u64, table_len, file_len, "symbol table")?;
            let strtab = read_range(&mut file, sym.stroff as u64, sym.strsize as u64, file_len, "string table")?;
            Some((parse_nlists(&nlists), strtab))
        }
        _ => None,
    };

    let image = ExecImage::from_parsed(&oh, symbols.as_ref().map(|(s, t)| (s.as_slice(), t.as_slice())), file_len)?;
    debug!(
        "parsed {}: entry={:#x} segments={}",
        path.display(),
        image.entry,
        image.segments.len()
    );
    Ok(image)
}

impl ExecImage {
    /// Builds the description from already parsed load commands.
    /// `symbols` is the decoded symbol table together with its string table.
    pub fn from_parsed(
        oh: &OhlinkFile,
        symbols: Option<(&[crate::Nlist64], &[u8])>,
        file_len: u64,
    ) -> Result<Self> {
        if oh.header.file_type != MH_EXECUTE {
            return Err(OhlinkError::UnsupportedFileType(oh.header.file_type));
        }

        let mut segments = Vec::new();
        for seg in oh.segments() {
            if let Some(s) = image_segment(seg, file_len)? {
                segments.push(s);
            }
        }
        if segments.is_empty() {
            return Err(OhlinkError::NoSegments);
        }

        let abi_version = oh.abi_version();
        if abi_version.is_none() {
            // 放宽：缺少 NoteAbi 也允许继续，由加载器决定是否强校验
            warn!("image carries no ABI note");
        }

        // 解析入口：优先查找符号表中的 `_start`
        let mut entry = symbols.and_then(|(nlists, strtab)| {
            nlists
                .iter()
                .find(|n| n.n_sect != 0 && read_cstr(strtab, n.n_strx as usize) == "_start")
                .map(|n| n.n_value)
        });

        if entry.is_none() {
            // 回退：选择 __TEXT 段的 vmaddr，再退到第一个可执行段
            entry = segments
                .iter()
                .find(|s| s.name == "__TEXT")
                .or_else(|| segments.iter().find(|s| s.permissions.contains(SegPerms::EXECUTE)))
                .map(|s| s.base_address);
        }

        Ok(Self {
            cpu_type: oh.header.cpu_type,
            entry: entry.unwrap_or(0),
            abi_version,
            segments,
        })
    }

    pub fn segment_for(&self, address: u64) -> Option<&ImageSegment> {
        self.segments.iter().find(|s| s.contains(address))
    }
}

fn image_segment(seg: &SegmentCommand64, file_len: u64) -> Result<Option<ImageSegment>> {
    let name = seg.name();
    if seg.vmsize == 0 {
        debug!("skipping empty segment {}", name);
        return Ok(None);
    }
    if seg.filesize > seg.vmsize {
        return Err(OhlinkError::InvalidSegment {
            name,
            message: format!("filesize {:#x} exceeds vmsize {:#x}", seg.filesize, seg.vmsize),
        });
    }
    let file_end = seg.fileoff.checked_add(seg.filesize);
    if file_end.map_or(true, |end| end > file_len) {
        return Err(OhlinkError::InvalidSegment {
            name,
            message: format!(
                "file range {:#x}+{:#x} lies outside the {:#x}-byte file",
                seg.fileoff, seg.filesize, file_len
            ),
        });
    }
    if seg.vmaddr.checked_add(seg.vmsize).is_none() {
        return Err(OhlinkError::InvalidSegment {
            name,
            message: "virtual range overflows the address space".to_string(),
        });
    }

    Ok(Some(ImageSegment {
        name,
        base_address: seg.vmaddr,
        file_offset: seg.fileoff,
        file_size: seg.filesize,
        memory_size: seg.vmsize,
        permissions: SegPerms::from_vm_prot(seg.initprot),
    }))
}

fn read_range(file: &mut File, offset: u64, len: u64, file_len: u64, what: &str) -> Result<Vec<u8>> {
    if offset.checked_add(len).map_or(true, |end| end > file_len) {
        return Err(OhlinkError::ParseError {
            offset,
            message: format!("{} ({:#x} bytes) runs past the end of the file", what, len),
        });
    }
    let mut buf = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf).map_err(|e| short_read(e, offset, what))?;
    Ok(buf)
}

fn short_read(err: std::io::Error, offset: u64, what: &str) -> OhlinkError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        OhlinkError::ParseError { offset, message: format!("File truncated in {}", what) }
    } else {
        OhlinkError::Io(err)
    }
}

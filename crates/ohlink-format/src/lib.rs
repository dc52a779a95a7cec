// crates/ohlink-format/src/lib.rs
#![allow(non_camel_case_types)]

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub mod image;

pub use image::{ExecImage, ImageSegment, SegPerms};

#[inline]
pub fn align_up(val: u64, align: u64) -> u64 {
    if align == 0 { val } else { ((val + align - 1) / align) * align }
}

// ==================== 错误类型 ====================
#[derive(Error, Debug)]
pub enum OhlinkError {
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    #[error("Unsupported CPU type: {0:#x}")]
    UnsupportedCpuType(u32),
    #[error("Unsupported file type: {0:#x}")]
    UnsupportedFileType(u32),
    #[error("Parse error at offset {offset:#x}: {message}")]
    ParseError { offset: u64, message: String },
    #[error("Segment {name} is invalid: {message}")]
    InvalidSegment { name: String, message: String },
    #[error("Image has no loadable segments")]
    NoSegments,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OhlinkError>;

// ==================== 常量定义 ====================
pub const OHLINK_MAGIC: [u8; 4] = 0x0f112233u32.to_le_bytes();
pub const OHLINK_MAGIC_64: [u8; 4] = 0x0f112234u32.to_le_bytes();
pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000C;
pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_NOTE_ABI: u32 = 0x31;
pub const NOTE_ABI_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 32;
pub const SEGMENT_CMD_SIZE: usize = std::mem::size_of::<SegmentCommand64>();
pub const SECTION_SIZE: usize = std::mem::size_of::<Section64>();
pub const SYMTAB_CMD_SIZE: usize = std::mem::size_of::<SymtabCommand>();
pub const NOTE_ABI_CMD_SIZE: usize = 16;
pub const NLIST_SIZE: usize = std::mem::size_of::<Nlist64>();

/// initprot / maxprot bits, same encoding as VM_PROT_*.
pub const VM_PROT_READ: i32 = 0x1;
pub const VM_PROT_WRITE: i32 = 0x2;
pub const VM_PROT_EXECUTE: i32 = 0x4;

/// CPU type matching the architecture this crate was compiled for, if any.
pub fn host_cpu_type() -> Option<u32> {
    if cfg!(target_arch = "x86_64") {
        Some(CPU_TYPE_X86_64)
    } else if cfg!(target_arch = "aarch64") {
        Some(CPU_TYPE_ARM64)
    } else {
        None
    }
}

// ==================== 核心结构 ====================
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct OhlinkHeader {
    pub magic: [u8; 4],
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub file_type: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl OhlinkHeader {
    pub fn is_64bit(&self) -> bool {
        self.magic == OHLINK_MAGIC_64
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != OHLINK_MAGIC && self.magic != OHLINK_MAGIC_64 {
            return Err(OhlinkError::InvalidMagic {
                expected: OHLINK_MAGIC_64,
                found: self.magic,
            });
        }

        if self.cpu_type != CPU_TYPE_ARM64 && self.cpu_type != CPU_TYPE_X86_64 {
            return Err(OhlinkError::UnsupportedCpuType(self.cpu_type));
        }

        Ok(())
    }

    /// Offset of the first byte after the load command area.
    pub fn commands_end(&self) -> u64 {
        HEADER_SIZE as u64 + self.sizeofcmds as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(OhlinkError::ParseError {
                offset: 0,
                message: "Data too short for Ohlink header".to_string(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand64 {
    pub fn name(&self) -> String {
        fixed_name(&self.segname)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Section64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Nlist64 {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

// ==================== 文件结构 ====================
#[derive(Debug, Clone)]
pub enum LoadCommand {
    Segment64(SegmentCommand64, Vec<Section64>),
    Symtab(SymtabCommand),
    Unknown {
        cmd: u32,
        cmdsize: u32,
        data: Vec<u8>,
    },
    NoteAbi { abi_version: u32, flags: u32 },
}

#[derive(Debug)]
pub struct OhlinkFile {
    pub header: OhlinkHeader,
    pub commands: Vec<LoadCommand>,
}

impl OhlinkFile {
    /// Parses the header and load commands. `data` only has to cover the
    /// first `32 + sizeofcmds` bytes; segment payloads are never touched.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = OhlinkHeader::from_bytes(data)?;
        header.validate()?;

        let mut commands = Vec::new();
        let mut offset = HEADER_SIZE;

        for _ in 0..header.ncmds {
            if offset + 8 > data.len() {
                return Err(OhlinkError::ParseError {
                    offset: offset as u64,
                    message: "Incomplete load command".to_string(),
                });
            }

            let cmd = read_u32(data, offset);
            let cmdsize = read_u32(data, offset + 4) as usize;
            if cmdsize < 8 || offset + cmdsize > data.len() {
                return Err(OhlinkError::ParseError {
                    offset: offset as u64,
                    message: format!("Load command size out of range: {}", cmdsize),
                });
            }

            match cmd {
                LC_SEGMENT_64 => {
                    if cmdsize < SEGMENT_CMD_SIZE {
                        return Err(OhlinkError::ParseError {
                            offset: offset as u64,
                            message: format!("Segment command too small: {}", cmdsize),
                        });
                    }

                    let segment_cmd: SegmentCommand64 =
                        bytemuck::pod_read_unaligned(&data[offset..offset + SEGMENT_CMD_SIZE]);

                    let nsects = segment_cmd.nsects as usize;
                    if SEGMENT_CMD_SIZE + nsects * SECTION_SIZE > cmdsize {
                        return Err(OhlinkError::ParseError {
                            offset: offset as u64,
                            message: format!("Segment declares {} sections but cmdsize is {}", nsects, cmdsize),
                        });
                    }

                    let mut sections = Vec::with_capacity(nsects);
                    let mut section_offset = offset + SEGMENT_CMD_SIZE;
                    for _ in 0..nsects {
                        let section: Section64 = bytemuck::pod_read_unaligned(
                            &data[section_offset..section_offset + SECTION_SIZE],
                        );
                        sections.push(section);
                        section_offset += SECTION_SIZE;
                    }

                    commands.push(LoadCommand::Segment64(segment_cmd, sections));
                }
                LC_SYMTAB => {
                    if cmdsize != SYMTAB_CMD_SIZE {
                        return Err(OhlinkError::ParseError {
                            offset: offset as u64,
                            message: format!("Invalid symtab command size: {}", cmdsize),
                        });
                    }

                    let symtab_cmd: SymtabCommand =
                        bytemuck::pod_read_unaligned(&data[offset..offset + SYMTAB_CMD_SIZE]);
                    commands.push(LoadCommand::Symtab(symtab_cmd));
                }
                LC_NOTE_ABI => {
                    if cmdsize != NOTE_ABI_CMD_SIZE {
                        return Err(OhlinkError::ParseError {
                            offset: offset as u64,
                            message: format!("Invalid NoteAbi size: {}", cmdsize),
                        });
                    }
                    let abi_version = read_u32(data, offset + 8);
                    let flags = read_u32(data, offset + 12);
                    commands.push(LoadCommand::NoteAbi { abi_version, flags });
                }
                _ => {
                    commands.push(LoadCommand::Unknown {
                        cmd,
                        cmdsize: cmdsize as u32,
                        data: data[offset..offset + cmdsize].to_vec(),
                    });
                }
            }

            offset += cmdsize;
        }

        Ok(Self { header, commands })
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentCommand64> {
        self.commands.iter().filter_map(|cmd| match cmd {
            LoadCommand::Segment64(seg, _) => Some(seg),
            _ => None,
        })
    }

    pub fn symtab(&self) -> Option<SymtabCommand> {
        self.commands.iter().rev().find_map(|cmd| match cmd {
            LoadCommand::Symtab(s) => Some(*s),
            _ => None,
        })
    }

    pub fn abi_version(&self) -> Option<u32> {
        self.commands.iter().find_map(|cmd| match cmd {
            LoadCommand::NoteAbi { abi_version, .. } => Some(*abi_version),
            _ => None,
        })
    }
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    bytemuck::pod_read_unaligned(&data[off..off + 4])
}

pub(crate) fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Reads a NUL-terminated string out of a string table.
pub fn read_cstr(buf: &[u8], off: usize) -> String {
    if off >= buf.len() { return String::new(); }
    let mut end = off;
    while end < buf.len() && buf[end] != 0 { end += 1; }
    String::from_utf8_lossy(&buf[off..end]).to_string()
}

/// Decodes a symbol table blob into entries.
pub fn parse_nlists(data: &[u8]) -> Vec<Nlist64> {
    data.chunks_exact(NLIST_SIZE)
        .map(bytemuck::pod_read_unaligned::<Nlist64>)
        .collect()
}

// ==================== 构建器 ====================
/// Produces Ohlink executables. Section payloads are placed at their
/// offset inside the segment, so file byte `fileoff + i` backs virtual
/// address `vmaddr + i` for every `i < filesize`.
pub struct OhlinkBuilder {
    file_type: u32,
    cpu_type: u32,
    segment_align: u64,
    abi_note: bool,
    segments: Vec<SegmentBuilder>,
    symbols: Vec<Nlist64>,
    strings: Vec<u8>,
}

impl OhlinkBuilder {
    pub fn new(file_type: u32) -> Self {
        Self {
            file_type,
            cpu_type: host_cpu_type().unwrap_or(CPU_TYPE_ARM64),
            segment_align: 0,
            abi_note: true,
            segments: Vec::new(),
            symbols: Vec::new(),
            strings: vec![0], // 字符串表以空字符开始
        }
    }

    pub fn cpu_type(&mut self, cpu_type: u32) -> &mut Self {
        self.cpu_type = cpu_type;
        self
    }

    /// Aligns every segment payload's file offset to `align` bytes.
    pub fn segment_file_align(&mut self, align: u64) -> &mut Self {
        self.segment_align = align;
        self
    }

    pub fn abi_note(&mut self, enabled: bool) -> &mut Self {
        self.abi_note = enabled;
        self
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn add_segment(&mut self, name: &str, vmaddr: u64) -> &mut SegmentBuilder {
        self.segments.push(SegmentBuilder {
            segname: name16(name),
            vmaddr,
            maxprot: VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE,
            initprot: VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE,
            vmsize: 0,
            sections: Vec::new(),
        });

        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }

    pub fn add_symbol(&mut self, name: &str, value: u64, sect: u8) -> u32 {
        let n_strx = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);

        let index = self.symbols.len() as u32;
        self.symbols.push(Nlist64 {
            n_strx,
            n_type: 0x0f,     // N_SECT | N_EXT
            n_sect: sect + 1, // 段索引从1开始
            n_desc: 0,
            n_value: value,
        });

        index
    }

    pub fn build(self) -> Vec<u8> {
        // 1. 计算加载命令总大小以确定数据区基址
        let load_commands_size: usize = self
            .segments
            .iter()
            .map(|seg| SEGMENT_CMD_SIZE + seg.sections.len() * SECTION_SIZE)
            .sum::<usize>()
            + SYMTAB_CMD_SIZE
            + if self.abi_note { NOTE_ABI_CMD_SIZE } else { 0 };

        let mut file_offset = (HEADER_SIZE + load_commands_size) as u64;
        let mut load_commands = Vec::with_capacity(load_commands_size);
        let mut payload = Vec::new();

        // 2. 段数据，偏移直接写成绝对文件偏移
        let segment_count = self.segments.len();
        for segment in &self.segments {
            let aligned = align_up(file_offset, self.segment_align);
            payload.resize(payload.len() + (aligned - file_offset) as usize, 0);
            file_offset = aligned;

            let (segment_cmd, sections, bytes) = segment.build(file_offset);
            load_commands.extend_from_slice(bytemuck::bytes_of(&segment_cmd));
            for section in &sections {
                load_commands.extend_from_slice(bytemuck::bytes_of(section));
            }

            payload.extend_from_slice(&bytes);
            file_offset += bytes.len() as u64;
        }

        // 3. 符号表和字符串表
        let symoff = file_offset as u32;
        for symbol in &self.symbols {
            payload.extend_from_slice(bytemuck::bytes_of(symbol));
        }
        file_offset += (self.symbols.len() * NLIST_SIZE) as u64;
        let stroff = file_offset as u32;
        payload.extend_from_slice(&self.strings);

        let symtab_cmd = SymtabCommand {
            cmd: LC_SYMTAB,
            cmdsize: SYMTAB_CMD_SIZE as u32,
            symoff,
            nsyms: self.symbols.len() as u32,
            stroff,
            strsize: self.strings.len() as u32,
        };
        load_commands.extend_from_slice(bytemuck::bytes_of(&symtab_cmd));

        let mut ncmds = segment_count + 1;
        if self.abi_note {
            load_commands.extend_from_slice(&LC_NOTE_ABI.to_le_bytes());
            load_commands.extend_from_slice(&(NOTE_ABI_CMD_SIZE as u32).to_le_bytes());
            load_commands.extend_from_slice(&NOTE_ABI_VERSION.to_le_bytes());
            load_commands.extend_from_slice(&0u32.to_le_bytes());
            ncmds += 1;
        }

        // 4. 头部
        let header = OhlinkHeader {
            magic: OHLINK_MAGIC_64,
            cpu_type: self.cpu_type,
            cpu_subtype: 0,
            file_type: self.file_type,
            ncmds: ncmds as u32,
            sizeofcmds: load_commands.len() as u32,
            flags: 0,
            reserved: 0,
        };

        let mut result = header.to_bytes();
        result.extend_from_slice(&load_commands);
        result.extend_from_slice(&payload);
        result
    }
}

pub struct SegmentBuilder {
    segname: [u8; 16],
    vmaddr: u64,
    maxprot: i32,
    initprot: i32,
    vmsize: u64,
    sections: Vec<SectionBuilder>,
}

impl SegmentBuilder {
    /// Sets the initial protection (VM_PROT_* bits).
    pub fn prot(&mut self, initprot: i32) -> &mut Self {
        self.initprot = initprot;
        self
    }

    /// Forces the virtual size of the segment; it never shrinks below the
    /// extent of its sections.
    pub fn vmsize(&mut self, vmsize: u64) -> &mut Self {
        self.vmsize = vmsize;
        self
    }

    pub fn add_section(&mut self, name: &str, data: &[u8], addr: u64) -> &mut Self {
        self.add_section_with(name, data, addr, data.len() as u64)
    }

    /// `size` may exceed `data.len()`; the excess is zero-fill that takes no
    /// room in the file.
    pub fn add_section_with(&mut self, name: &str, data: &[u8], addr: u64, size: u64) -> &mut Self {
        self.sections.push(SectionBuilder {
            sectname: name16(name),
            addr,
            size: size.max(data.len() as u64),
            data: data.to_vec(),
        });

        self
    }

    fn build(&self, fileoff: u64) -> (SegmentCommand64, Vec<Section64>, Vec<u8>) {
        let mut bytes: Vec<u8> = Vec::new();
        let mut headers = Vec::with_capacity(self.sections.len());
        let mut vmend = self.vmsize;

        for section in &self.sections {
            if !section.data.is_empty() {
                let start = section.addr as usize;
                let end = start + section.data.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[start..end].copy_from_slice(&section.data);
            }

            headers.push(Section64 {
                sectname: section.sectname,
                segname: self.segname,
                addr: self.vmaddr + section.addr,
                size: section.size,
                offset: if section.data.is_empty() { 0 } else { (fileoff + section.addr) as u32 },
                align: 0,
                reloff: 0,
                nreloc: 0,
                flags: 0,
                reserved1: 0,
                reserved2: 0,
                reserved3: 0,
            });
            vmend = vmend.max(section.addr + section.size);
        }

        let segment_cmd = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: (SEGMENT_CMD_SIZE + headers.len() * SECTION_SIZE) as u32,
            segname: self.segname,
            vmaddr: self.vmaddr,
            vmsize: vmend.max(bytes.len() as u64),
            fileoff,
            filesize: bytes.len() as u64,
            maxprot: self.maxprot,
            initprot: self.initprot,
            nsects: headers.len() as u32,
            flags: 0,
        };

        (segment_cmd, headers, bytes)
    }
}

struct SectionBuilder {
    sectname: [u8; 16],
    addr: u64,
    size: u64,
    data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse_offsets() {
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.add_segment("__TEXT", 0x4000_0000)
            .prot(VM_PROT_READ | VM_PROT_EXECUTE)
            .add_section("__text", &[1, 2, 3, 4], 0x0);
        b.add_symbol("_start", 0x4000_0000, 0);

        let bytes = b.build();
        let parsed = OhlinkFile::parse(&bytes).expect("parse");

        assert_eq!(parsed.header.magic, OHLINK_MAGIC_64);
        assert_eq!(parsed.header.ncmds, 3);
        assert_eq!(parsed.abi_version(), Some(NOTE_ABI_VERSION));

        let seg = *parsed.segments().next().expect("segment");
        let sym = parsed.symtab().expect("symtab");

        // 数据区起始应为 32 + sizeofcmds
        assert_eq!(seg.fileoff, parsed.header.commands_end());
        assert_eq!(seg.filesize, 4);
        assert_eq!(seg.vmsize, 4);
        assert_eq!(seg.initprot, VM_PROT_READ | VM_PROT_EXECUTE);
        assert_eq!(seg.name(), "__TEXT");
        let start = seg.fileoff as usize;
        assert_eq!(&bytes[start..start + 4], &[1, 2, 3, 4]);

        // 符号表应紧随段数据之后
        assert_eq!(sym.symoff as u64, seg.fileoff + seg.filesize);
        assert_eq!(sym.stroff as usize, sym.symoff as usize + NLIST_SIZE);
        let syms = parse_nlists(&bytes[sym.symoff as usize..sym.stroff as usize]);
        let strtab = &bytes[sym.stroff as usize..];
        assert_eq!(read_cstr(strtab, syms[0].n_strx as usize), "_start");
        assert_eq!(syms[0].n_value, 0x4000_0000);
    }

    #[test]
    fn sections_land_at_their_segment_offset() {
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.add_segment("__DATA", 0x1000)
            .add_section("__data", &[0xaa; 3], 0x10)
            .add_section_with("__bss", &[], 0x20, 0x2000);

        let bytes = b.build();
        let parsed = OhlinkFile::parse(&bytes).unwrap();
        let seg = *parsed.segments().next().unwrap();

        assert_eq!(seg.filesize, 0x13);
        assert_eq!(seg.vmsize, 0x2020);
        let start = seg.fileoff as usize;
        assert!(bytes[start..start + 0x10].iter().all(|&b| b == 0));
        assert_eq!(&bytes[start + 0x10..start + 0x13], &[0xaa; 3]);
    }

    #[test]
    fn segment_payloads_respect_file_alignment() {
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.segment_file_align(0x1000);
        b.add_segment("__TEXT", 0x1000).add_section("__text", &[1; 5], 0);
        b.add_segment("__DATA", 0x3000).add_section("__data", &[2; 5], 0);

        let parsed = OhlinkFile::parse(&b.build()).unwrap();
        for seg in parsed.segments() {
            assert_eq!(seg.fileoff % 0x1000, 0);
        }
    }

    #[test]
    fn rejects_bad_magic_and_cpu() {
        let mut bytes = OhlinkBuilder::new(MH_EXECUTE).build();
        bytes[0] ^= 0xff;
        assert!(matches!(OhlinkFile::parse(&bytes), Err(OhlinkError::InvalidMagic { .. })));

        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.cpu_type(0x42);
        assert!(matches!(
            OhlinkFile::parse(&b.build()),
            Err(OhlinkError::UnsupportedCpuType(0x42))
        ));
    }

    #[test]
    fn absurd_command_count_is_a_parse_error() {
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.add_segment("__TEXT", 0x1000).add_section("__text", &[1], 0);
        let mut bytes = b.build();
        // ncmds 位于头部偏移 16
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = OhlinkFile::parse(&bytes).unwrap_err();
        assert!(matches!(err, OhlinkError::ParseError { .. }));
    }

    #[test]
    fn truncated_commands_are_reported() {
        let mut b = OhlinkBuilder::new(MH_EXECUTE);
        b.add_segment("__TEXT", 0x1000).add_section("__text", &[1], 0);
        let bytes = b.build();
        let err = OhlinkFile::parse(&bytes[..HEADER_SIZE + 40]).unwrap_err();
        assert!(matches!(err, OhlinkError::ParseError { .. }));
    }
}

//! Hands control to the program's entry point.

use std::convert::Infallible;
use std::ffi::OsString;
use std::io;
use std::os::unix::ffi::OsStrExt;

use log::info;
use ohlink_format::{host_cpu_type, ExecImage};

use crate::error::LaunchError;
use crate::page::{align_down, host_page_size};

const WORD: usize = std::mem::size_of::<usize>();

// auxv 类型
const AT_NULL: usize = 0;
const AT_PAGESZ: usize = 6;
const AT_ENTRY: usize = 9;

pub trait Launcher {
    /// Starts the program. Never returns on success.
    fn start(&self, image: &ExecImage, argv: &[OsString]) -> Result<Infallible, LaunchError>;
}

/// Jumps to the entry point on a fresh System V style stack.
#[derive(Debug, Clone)]
pub struct NativeLauncher {
    stack_size: usize,
}

impl NativeLauncher {
    pub fn new(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl Launcher for NativeLauncher {
    fn start(&self, image: &ExecImage, argv: &[OsString]) -> Result<Infallible, LaunchError> {
        let host = host_cpu_type();
        if host != Some(image.cpu_type) {
            return Err(LaunchError::ArchMismatch { image: image.cpu_type, host });
        }

        let args = c_strings(argv.iter().map(|a| a.as_bytes().to_vec()))?;
        let env = c_strings(std::env::vars_os().map(|(k, v)| {
            let mut kv = k.as_bytes().to_vec();
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            kv
        }))?;
        let entry = image.entry as usize;
        let auxv = [(AT_PAGESZ, host_page_size()), (AT_ENTRY, entry)];

        let base = map_stack(self.stack_size)?;
        let stack = unsafe { std::slice::from_raw_parts_mut(base as *mut u8, self.stack_size) };
        let sp = build_startup_stack(stack, base, &args, &env, &auxv)?;

        info!("starting program at {:#x} (sp={:#x}, argc={})", entry, sp, args.len());
        unsafe { enter(entry, sp) }
    }
}

fn c_strings(items: impl Iterator<Item = Vec<u8>>) -> Result<Vec<Vec<u8>>, LaunchError> {
    items
        .map(|mut s| {
            if s.contains(&0) {
                return Err(LaunchError::Argument(String::from_utf8_lossy(&s).into_owned()));
            }
            s.push(0);
            Ok(s)
        })
        .collect()
}

fn map_stack(len: usize) -> Result<usize, LaunchError> {
    let p = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if p == libc::MAP_FAILED {
        return Err(LaunchError::Stack(io::Error::last_os_error()));
    }
    Ok(p as usize)
}

/// Lays out the initial process stack inside `stack`, which is mapped at
/// address `base`. Strings (already NUL-terminated) go at the top, below
/// them, from the returned 16-byte aligned stack pointer upwards:
/// argc, argv[], NULL, envp[], NULL, auxv pairs, AT_NULL.
pub fn build_startup_stack(
    stack: &mut [u8],
    base: usize,
    argv: &[Vec<u8>],
    envp: &[Vec<u8>],
    auxv: &[(usize, usize)],
) -> Result<usize, LaunchError> {
    let strings: usize = argv.iter().chain(envp).map(|s| s.len()).sum();
    let words = 1 + argv.len() + 1 + envp.len() + 1 + 2 * (auxv.len() + 1);
    let needed = strings + words * WORD + 32;
    if needed > stack.len() {
        return Err(LaunchError::StackTooSmall { needed, available: stack.len() });
    }

    // 1. 字符串从栈顶向下放
    let mut cursor = stack.len();
    let mut place = |s: &[u8]| {
        cursor -= s.len();
        stack[cursor..cursor + s.len()].copy_from_slice(s);
        base + cursor
    };
    let arg_ptrs: Vec<usize> = argv.iter().map(|s| place(s)).collect();
    let env_ptrs: Vec<usize> = envp.iter().map(|s| place(s)).collect();

    // 2. 指针区，起点 16 字节对齐
    let sp = align_down(base + cursor - words * WORD, 16);
    let mut table = Vec::with_capacity(words);
    table.push(argv.len());
    table.extend(&arg_ptrs);
    table.push(0);
    table.extend(&env_ptrs);
    table.push(0);
    for &(key, value) in auxv {
        table.push(key);
        table.push(value);
    }
    table.push(AT_NULL);
    table.push(0);

    let mut off = sp - base;
    for word in table {
        stack[off..off + WORD].copy_from_slice(&word.to_ne_bytes());
        off += WORD;
    }
    Ok(sp)
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        unsafe fn enter(entry: usize, sp: usize) -> Result<Infallible, LaunchError> {
            // rdx 为 0：没有需要注册的 atexit 函数
            std::arch::asm!(
                "mov rsp, {sp}",
                "xor rbp, rbp",
                "xor edx, edx",
                "jmp {entry}",
                sp = in(reg) sp,
                entry = in(reg) entry,
                options(noreturn)
            );
        }
    } else if #[cfg(target_arch = "aarch64")] {
        unsafe fn enter(entry: usize, sp: usize) -> Result<Infallible, LaunchError> {
            std::arch::asm!(
                "mov sp, {sp}",
                "mov x29, xzr",
                "mov x30, xzr",
                "br {entry}",
                sp = in(reg) sp,
                entry = in(reg) entry,
                options(noreturn)
            );
        }
    } else {
        unsafe fn enter(_entry: usize, _sp: usize) -> Result<Infallible, LaunchError> {
            Err(LaunchError::Unsupported(std::env::consts::ARCH))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_at(stack: &[u8], base: usize, addr: usize) -> usize {
        let off = addr - base;
        usize::from_ne_bytes(stack[off..off + WORD].try_into().unwrap())
    }

    fn cstr_at(stack: &[u8], base: usize, addr: usize) -> &[u8] {
        let off = addr - base;
        let end = stack[off..].iter().position(|&b| b == 0).unwrap();
        &stack[off..off + end]
    }

    #[test]
    fn startup_stack_layout() {
        let mut stack = vec![0u8; 4096];
        let base = stack.as_ptr() as usize;
        let argv = vec![b"prog\0".to_vec(), b"-x\0".to_vec()];
        let envp = vec![b"HOME=/root\0".to_vec()];
        let auxv = [(AT_PAGESZ, 4096), (AT_ENTRY, 0x40_0000)];

        let sp = build_startup_stack(&mut stack, base, &argv, &envp, &auxv).unwrap();
        assert_eq!(sp % 16, 0);

        let mut at = sp;
        let mut next = || {
            let w = word_at(&stack, base, at);
            at += WORD;
            w
        };
        assert_eq!(next(), 2);
        let a0 = next();
        let a1 = next();
        assert_eq!(next(), 0);
        let e0 = next();
        assert_eq!(next(), 0);
        assert_eq!((next(), next()), (AT_PAGESZ, 4096));
        assert_eq!((next(), next()), (AT_ENTRY, 0x40_0000));
        assert_eq!((next(), next()), (AT_NULL, 0));

        assert_eq!(cstr_at(&stack, base, a0), b"prog");
        assert_eq!(cstr_at(&stack, base, a1), b"-x");
        assert_eq!(cstr_at(&stack, base, e0), b"HOME=/root");
    }

    #[test]
    fn startup_stack_too_small() {
        let mut stack = vec![0u8; 64];
        let base = stack.as_ptr() as usize;
        let argv = vec![vec![b'a'; 60]];
        let err = build_startup_stack(&mut stack, base, &argv, &[], &[]).unwrap_err();
        assert!(matches!(err, LaunchError::StackTooSmall { available: 64, .. }));
    }

    #[test]
    fn arguments_with_nul_are_rejected() {
        let err = c_strings(vec![b"ok".to_vec(), b"b\0ad".to_vec()].into_iter()).unwrap_err();
        assert!(matches!(err, LaunchError::Argument(_)));
    }

    #[test]
    fn foreign_architecture_is_refused() {
        let image = ExecImage { cpu_type: 0xdead, entry: 0, abi_version: None, segments: Vec::new() };
        let err = NativeLauncher::new(1 << 16).start(&image, &[]).unwrap_err();
        assert!(matches!(err, LaunchError::ArchMismatch { image: 0xdead, .. }));
    }
}

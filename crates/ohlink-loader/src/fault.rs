//! Process-wide `SIGSEGV` interception.
//!
//! There is one interceptor per process. [`FaultInterceptor::install`]
//! moves the resolver into a once-cell, remembers whatever disposition
//! `SIGSEGV` had before, and registers [`on_fault`]. From then on every
//! segmentation fault goes through the resolver first:
//!
//! - resolved faults return so the faulting instruction runs again;
//! - foreign faults are passed to the previous disposition;
//! - resolver errors end the process with a failure status.
//!
//! `SIGSEGV` is blocked while the handler runs, so a fault raised while a
//! page is being populated is not handled recursively. Faults are assumed
//! to come from one thread at a time.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use libc::{c_int, c_void, siginfo_t};
use log::{error, info};

use crate::error::{LoaderError, Result};
use crate::resolver::{Fault, FaultKind, PageResolver, Resolution, ResolverStats};

// si_code values for SIGSEGV; identical on Linux, the BSDs and macOS.
const SEGV_MAPERR: c_int = 1;
const SEGV_ACCERR: c_int = 2;

type FaultHandler = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);

static INTERCEPTOR: OnceLock<FaultInterceptor> = OnceLock::new();
static ACTIVE: AtomicBool = AtomicBool::new(false);
static INSTALLING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    Uninstalled,
    Installed,
}

pub struct FaultInterceptor {
    resolver: PageResolver,
    previous: libc::sigaction,
}

impl FaultInterceptor {
    /// Registers the fault handler. Only the first successful call in a
    /// process installs anything; a failed registration leaves the
    /// interceptor uninstalled and may be retried.
    pub fn install(resolver: PageResolver) -> Result<&'static FaultInterceptor> {
        Self::install_with(resolver, |action| unsafe {
            if libc::sigaction(libc::SIGSEGV, action, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        })
    }

    fn install_with(
        resolver: PageResolver,
        register: impl FnOnce(&libc::sigaction) -> io::Result<()>,
    ) -> Result<&'static FaultInterceptor> {
        if INSTALLING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoaderError::AlreadyInstalled);
        }
        let release = |err: LoaderError| {
            INSTALLING.store(false, Ordering::Release);
            err
        };

        // 1. 先取得旧的处理方式，转发时要用
        let previous = unsafe { query_action(libc::SIGSEGV) }
            .map_err(|e| release(LoaderError::Install(e)))?;

        // 2. 注册处理函数，处理期间屏蔽 SIGSEGV；注册成功后才占用单例
        let action = unsafe {
            let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
            action.sa_sigaction = on_fault as FaultHandler as usize;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaddset(&mut action.sa_mask, libc::SIGSEGV);
            action
        };
        register(&action).map_err(|e| release(LoaderError::Install(e)))?;

        // INSTALLING 保证只有一个调用者走到这里
        let interceptor = INTERCEPTOR.get_or_init(|| FaultInterceptor { resolver, previous });
        ACTIVE.store(true, Ordering::Release);

        info!(
            "fault interceptor installed ({} segments, {} backend)",
            interceptor.resolver.table().segments().len(),
            interceptor.resolver.backend_name()
        );
        Ok(interceptor)
    }

    pub fn state() -> InterceptorState {
        if ACTIVE.load(Ordering::Acquire) {
            InterceptorState::Installed
        } else {
            InterceptorState::Uninstalled
        }
    }

    /// The installed interceptor, if any.
    pub fn get() -> Option<&'static FaultInterceptor> {
        INTERCEPTOR.get()
    }

    pub fn resolver(&self) -> &PageResolver {
        &self.resolver
    }

    pub fn stats(&self) -> ResolverStats {
        self.resolver.stats()
    }

    /// Hands a fault we do not own to the disposition that was in place
    /// before us.
    unsafe fn propagate(&self, sig: c_int, info: *mut siginfo_t, ctx: *mut c_void) {
        let handler = self.previous.sa_sigaction;
        let sent = !info.is_null() && !is_hardware_fault(&*info);
        if handler == libc::SIG_IGN && sent {
            // kill/raise 发来的信号照旧被忽略
        } else if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
            // 恢复默认处理后返回：重新执行的访问会像没有加载器时一样终止进程。
            // 发送来的信号没有可重新执行的访问，需要再发一次
            restore_default(sig);
            if sent {
                libc::raise(sig);
            }
        } else if self.previous.sa_flags & libc::SA_SIGINFO != 0 {
            let f: FaultHandler = std::mem::transmute(handler);
            f(sig, info, ctx);
        } else {
            let f: extern "C" fn(c_int) = std::mem::transmute(handler);
            f(sig);
        }
    }
}

extern "C" fn on_fault(sig: c_int, info: *mut siginfo_t, ctx: *mut c_void) {
    let Some(interceptor) = FaultInterceptor::get() else {
        unsafe {
            restore_default(sig);
            if !info.is_null() && !is_hardware_fault(&*info) {
                libc::raise(sig);
            }
        }
        return;
    };
    let fault = unsafe { fault_from_siginfo(&*info) };

    match interceptor.resolver.resolve(&fault) {
        Ok(Resolution::Handled) => {}
        Ok(Resolution::Foreign) => unsafe { interceptor.propagate(sig, info, ctx) },
        Err(err) => {
            error!(
                "unrecoverable fault at {:#x} in {}: {}",
                fault.addr,
                interceptor.resolver.image_path().display(),
                err
            );
            eprintln!("ohlink: fatal: {}", err);
            unsafe { libc::_exit(libc::EXIT_FAILURE) };
        }
    }
}

fn is_hardware_fault(info: &siginfo_t) -> bool {
    matches!(info.si_code, SEGV_MAPERR | SEGV_ACCERR)
}

unsafe fn fault_from_siginfo(info: &siginfo_t) -> Fault {
    let addr = fault_address(info);
    let kind = match info.si_code {
        SEGV_MAPERR => FaultKind::Unmapped,
        SEGV_ACCERR => FaultKind::Forbidden,
        // 其他来源（如 kill 发送）一律不处理
        _ => FaultKind::Forbidden,
    };
    Fault { addr, kind }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        unsafe fn fault_address(info: &siginfo_t) -> usize {
            info.si_addr() as usize
        }
    } else {
        unsafe fn fault_address(info: &siginfo_t) -> usize {
            info.si_addr as usize
        }
    }
}

unsafe fn query_action(sig: c_int) -> io::Result<libc::sigaction> {
    let mut old: libc::sigaction = MaybeUninit::zeroed().assume_init();
    if libc::sigaction(sig, ptr::null(), &mut old) != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(old)
}

unsafe fn restore_default(sig: c_int) {
    let mut dfl: libc::sigaction = MaybeUninit::zeroed().assume_init();
    dfl.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut dfl.sa_mask);
    libc::sigaction(sig, &dfl, ptr::null_mut());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::CopyIn;
    use crate::page::host_page_size;
    use crate::segment::SegmentTable;
    use crate::source::BackingFile;
    use ohlink_format::{ExecImage, ImageSegment, SegPerms};

    fn resolver(file: &tempfile::NamedTempFile) -> PageResolver {
        let page = host_page_size();
        let image = ExecImage {
            cpu_type: 0,
            entry: 0,
            abi_version: None,
            segments: vec![ImageSegment {
                name: "__BSS".into(),
                base_address: 0x10_0000 * page as u64,
                file_offset: 0,
                file_size: 0,
                memory_size: page as u64,
                permissions: SegPerms::READ | SegPerms::WRITE,
            }],
        };
        let table = SegmentTable::new(&image, page).unwrap();
        PageResolver::new(table, BackingFile::open(file.path()).unwrap(), Box::new(CopyIn))
    }

    // 本测试二进制中只有这一个用例触碰全局拦截器，且从不真正注册
    #[test]
    fn failed_registration_leaves_interceptor_uninstalled() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let err = FaultInterceptor::install_with(resolver(&file), |_| {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        })
        .err()
        .unwrap();
        assert!(matches!(err, LoaderError::Install(_)));
        assert_eq!(FaultInterceptor::state(), InterceptorState::Uninstalled);
        assert!(FaultInterceptor::get().is_none());

        // 重试会再次尝试注册，而不是报告已安装
        let mut attempted = false;
        let err = FaultInterceptor::install_with(resolver(&file), |_| {
            attempted = true;
            Err(io::Error::from_raw_os_error(libc::EPERM))
        })
        .err()
        .unwrap();
        assert!(attempted);
        assert!(matches!(err, LoaderError::Install(_)));
        assert!(FaultInterceptor::get().is_none());
    }

    #[test]
    fn only_access_faults_count_as_hardware_faults() {
        let mut info: siginfo_t = unsafe { MaybeUninit::zeroed().assume_init() };
        for (code, hardware) in [(SEGV_MAPERR, true), (SEGV_ACCERR, true), (0, false), (-6, false)] {
            info.si_code = code;
            assert_eq!(is_hardware_fault(&info), hardware, "si_code {}", code);
        }
    }
}

//! How the installed interceptor ends the process when a fault cannot be
//! served, with the default `SIGSEGV` action in place before it.

mod common;

use std::mem::MaybeUninit;
use std::ptr;

use common::{dies_with_segv, free_range, in_child, pattern, read, write_image};
use ohlink_format::{OhlinkBuilder, MH_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
use ohlink_loader::page::host_page_size;
use ohlink_loader::{Backend, FaultInterceptor, LazyLoader, LoaderConfig};

fn default_segv_action() {
    unsafe {
        let mut dfl: libc::sigaction = MaybeUninit::zeroed().assume_init();
        dfl.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut dfl.sa_mask);
        assert_eq!(libc::sigaction(libc::SIGSEGV, &dfl, ptr::null_mut()), 0);
    }
}

#[test]
fn unservable_faults_exit_and_sent_signals_still_kill() {
    let page = host_page_size();
    let base = free_range(4);

    // __DATA 两页文件内容，之后是一页空洞
    let mut b = OhlinkBuilder::new(MH_EXECUTE);
    b.add_segment("__DATA", base as u64)
        .prot(VM_PROT_READ | VM_PROT_WRITE)
        .add_section("__data", &pattern(2 * page), 0);
    let file = write_image(b);

    let config = LoaderConfig { backend: Backend::CopyIn, ..LoaderConfig::default() };
    let (_, resolver) = LazyLoader::new(config).prepare(file.path()).unwrap();
    assert_eq!(resolver.backend_name(), "copy-in");

    // 文件在准备之后被截断：缺页时的读取会变短
    file.as_file().set_len(0).unwrap();

    default_segv_action();
    let interceptor = FaultInterceptor::install(resolver).unwrap();

    // 1. 无法填充的页：以失败状态退出，而不是被信号杀死或反复缺页
    let status = in_child(
        |addr| {
            read(addr);
        },
        base + 5,
    );
    assert!(libc::WIFEXITED(status), "child ended with status {:#x}", status);
    assert_eq!(libc::WEXITSTATUS(status), libc::EXIT_FAILURE);

    // 2. 空洞访问交给默认处理
    dies_with_segv(
        |addr| {
            read(addr);
        },
        base + 2 * page,
    );

    // 3. kill/raise 发来的 SIGSEGV 没有可重试的访问，仍要终止进程
    dies_with_segv(
        |_| unsafe {
            libc::raise(libc::SIGSEGV);
        },
        0,
    );

    assert_eq!(interceptor.resolver().table().resident_pages(), 0);
    assert_eq!(interceptor.stats().resolved(), 0);
}

// crates/ohlink-run/src/main.rs
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use ohlink_loader::config::DEFAULT_STACK_SIZE;
use ohlink_loader::{Backend, LazyLoader, LoaderConfig, NativeLauncher};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run an Ohlink executable, mapping its pages on first touch", long_about = None)]
struct Args {
    /// Ohlink executable to run
    program: PathBuf,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,

    /// How faulted pages are populated
    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Stack size for the program in bytes
    #[arg(long, default_value_t = DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// Refuse images without an ABI note
    #[arg(long, default_value_t = false)]
    require_abi_note: bool,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Auto,
    CopyIn,
    MapFile,
}

impl From<BackendArg> for Backend {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Auto => Backend::Auto,
            BackendArg::CopyIn => Backend::CopyIn,
            BackendArg::MapFile => Backend::MapFile,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 1. 日志：默认 warn，-v 逐级提高，RUST_LOG 优先
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    // 2. 加载配置
    let config = LoaderConfig {
        backend: args.backend.into(),
        stack_size: args.stack_size,
        require_abi_note: args.require_abi_note,
    };

    // 3. argv[0] 为程序路径
    let mut argv = Vec::with_capacity(args.args.len() + 1);
    argv.push(args.program.clone().into_os_string());
    argv.extend(args.args);

    // 4. 成功时不会返回
    let loader = LazyLoader::new(config);
    let launcher = NativeLauncher::new(loader.config().stack_size);
    match loader
        .execute(&args.program, &argv, &launcher)
        .with_context(|| format!("Failed to run {:?}", args.program))?
    {}
}

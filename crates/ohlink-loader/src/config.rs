/// Which [`Materializer`](crate::materialize::Materializer) services faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// File mapping when every segment's file offset is page-aligned,
    /// copy-in otherwise.
    #[default]
    Auto,
    CopyIn,
    MapFile,
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub backend: Backend,
    /// Size of the stack handed to the program.
    pub stack_size: usize,
    /// Refuse images without an `LC_NOTE_ABI` command.
    pub require_abi_note: bool,
}

pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            stack_size: DEFAULT_STACK_SIZE,
            require_abi_note: false,
        }
    }
}

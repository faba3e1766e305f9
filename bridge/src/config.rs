//! Bridge configuration.

/// Size of one WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: u64 = 65536;

/// Names of the guest exports the compile/invoke protocol calls.
///
/// Defaults match a component-style QuickJS plugin: a canonical-ABI
/// `cabi_realloc` allocator plus `compile-src` and `invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNames {
    /// `alloc(old_ptr, old_size, align, new_size) -> ptr`
    pub alloc: String,
    /// `compile(src_ptr, src_len) -> descriptor_ptr`
    pub compile: String,
    /// `invoke(result_slot, bc_ptr, bc_len, arg_ptr, arg_len)`
    pub invoke: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            alloc: "cabi_realloc".to_string(),
            compile: "compile-src".to_string(),
            invoke: "invoke".to_string(),
        }
    }
}

/// Configuration for the bridge engine and every instance it creates.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum linear memory pages per instance (1 page = 64 KiB).
    /// Default: 4096 pages = 256 MiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel per instance. `None` disables metering entirely,
    /// so a non-terminating guest blocks the calling thread.
    pub fuel_limit: Option<u64>,

    /// Emit native debug info for compiled code.
    pub debug_info: bool,

    /// Upper bound on bytes kept for each captured stdout/stderr stream.
    pub capture_limit: usize,

    /// Guest export names used by the bridge protocol.
    pub exports: ExportNames,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 4096,      // 256 MiB
            fuel_limit: None,
            debug_info: false,
            capture_limit: 16 * 1024 * 1024,
            exports: ExportNames::default(),
        }
    }
}

impl BridgeConfig {
    /// Maximum linear memory size in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_pages as u64 * WASM_PAGE_SIZE) as usize
    }
}

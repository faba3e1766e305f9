//! Module loader: Wasmtime engine setup and module compilation.
//!
//! Compilation is the expensive step and happens once per distinct image.
//! The resulting [`CompiledModule`] is immutable, cheap to clone and safe to
//! share across threads; each execution instantiates it afresh.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use wasmtime::{Config, Engine, Module};

use crate::config::BridgeConfig;
use crate::error::LoadError;
use crate::validation::validate_memory;

/// Compiles module images against one configured engine.
#[derive(Clone)]
pub struct Loader {
    engine: Engine,
    config: Arc<BridgeConfig>,
}

impl Loader {
    /// Create a loader whose engine follows `config`.
    pub fn new(config: BridgeConfig) -> Result<Self, LoadError> {
        let engine = create_engine(&config)?;
        Ok(Self {
            engine,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Compile a binary (or text-format) module image.
    pub fn compile(&self, image: &[u8]) -> Result<CompiledModule, LoadError> {
        let started = Instant::now();
        debug!(bytes = image.len(), "compiling module");
        let module = Module::new(&self.engine, image)?;
        validate_memory(&module)?;
        info!(
            bytes = image.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "module compiled"
        );
        Ok(CompiledModule {
            engine: self.engine.clone(),
            module,
            config: Arc::clone(&self.config),
        })
    }

    /// Read a module image from `path` and compile it.
    pub fn compile_file(&self, path: &Path) -> Result<CompiledModule, LoadError> {
        let image = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "read module image");
        self.compile(&image)
    }
}

/// An immutable compiled module, ready to be instantiated any number of times.
#[derive(Clone)]
pub struct CompiledModule {
    engine: Engine,
    module: Module,
    config: Arc<BridgeConfig>,
}

impl CompiledModule {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Names of every export, in declaration order.
    pub fn exports(&self) -> Vec<String> {
        self.module.exports().map(|e| e.name().to_string()).collect()
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.module.get_export(name).is_some()
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.module.name())
            .field("exports", &self.exports())
            .finish()
    }
}

/// Compile `image` with the default configuration.
pub fn compile(image: &[u8]) -> Result<CompiledModule, LoadError> {
    Loader::new(BridgeConfig::default())?.compile(image)
}

/// Create a Wasmtime engine for `config`.
fn create_engine(config: &BridgeConfig) -> Result<Engine, LoadError> {
    let mut wasm_config = Config::new();

    // Fuel metering only when the integrator asks for a bound
    wasm_config.consume_fuel(config.fuel_limit.is_some());
    wasm_config.debug_info(config.debug_info);

    // Instances never share memory with other threads
    wasm_config.wasm_threads(false);

    let max_bytes = config.max_memory_bytes() as u64;
    wasm_config.memory_guaranteed_dense_image_size(max_bytes.min(16 * 1024 * 1024));

    Engine::new(&wasm_config).map_err(|e| LoadError::Engine(format!("{:#}", e)))
}

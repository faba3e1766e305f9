//! Instantiation context: one running guest with its own store.
//!
//! Every execution creates a fresh [`Instance`] from a [`CompiledModule`]:
//! a new store with its own linear memory, a WASI preview1 context wired to
//! the requested stdio and argv, and the store limits from the bridge config.
//! Nothing in an instance is shared with any other instance.

use tracing::{debug, warn};
use wasmtime::{
    Linker, Store, StoreLimits, StoreLimitsBuilder, Trap, TypedFunc, WasmParams, WasmResults,
};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::WasiCtxBuilder;

use guestjs_hostapi::{EnvironmentConfig, OutputSink, StdinSource};

use crate::error::{CallTrapError, InstantiationError, TrapKind};
use crate::loader::CompiledModule;
use crate::memory::GuestMemory;
use crate::validation::{INITIALIZE_EXPORT, MEMORY_EXPORT, START_EXPORT};

/// Per-store host state.
pub struct HostState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// What an instance leaves behind after teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// The instance's diagnostic name.
    pub name: String,
    /// Captured stdout, when the environment asked for capture.
    pub stdout: Option<Vec<u8>>,
    /// Captured stderr, when the environment asked for capture.
    pub stderr: Option<Vec<u8>>,
    /// Fuel consumed, when metering is enabled.
    pub fuel_consumed: Option<u64>,
}

/// One running instantiation of a compiled module.
pub struct Instance {
    name: String,
    store: Store<HostState>,
    instance: wasmtime::Instance,
    memory: GuestMemory,
    stdout: Option<MemoryOutputPipe>,
    stderr: Option<MemoryOutputPipe>,
    fuel_limit: Option<u64>,
}

/// Instantiate `module` against the host environment `env`.
///
/// Links WASI preview1, instantiates, resolves the `memory` export and runs
/// `_initialize` if the module exports it.
pub fn instantiate(
    module: &CompiledModule,
    env: &EnvironmentConfig,
) -> Result<Instance, InstantiationError> {
    let config = module.config();

    // 1. Build the WASI context with the requested stdio and argv
    let mut builder = WasiCtxBuilder::new();
    match &env.stdin {
        StdinSource::Inherit => {
            builder.inherit_stdin();
        }
        StdinSource::Null => {}
        StdinSource::Bytes(bytes) => {
            builder.stdin(MemoryInputPipe::new(bytes.clone()));
        }
    }
    let stdout = match env.stdout {
        OutputSink::Inherit => {
            builder.inherit_stdout();
            None
        }
        OutputSink::Null => None,
        OutputSink::Capture => {
            let pipe = MemoryOutputPipe::new(config.capture_limit);
            builder.stdout(pipe.clone());
            Some(pipe)
        }
    };
    let stderr = match env.stderr {
        OutputSink::Inherit => {
            builder.inherit_stderr();
            None
        }
        OutputSink::Null => None,
        OutputSink::Capture => {
            let pipe = MemoryOutputPipe::new(config.capture_limit);
            builder.stderr(pipe.clone());
            Some(pipe)
        }
    };
    builder.args(env.effective_argv().as_slice());
    for (key, value) in &env.env {
        builder.env(key, value);
    }

    // 2. Create the store with memory limits and optional fuel
    let limits = StoreLimitsBuilder::new()
        .memory_size(config.max_memory_bytes())
        .build();
    let mut store = Store::new(
        module.engine(),
        HostState {
            wasi: builder.build_p1(),
            limits,
        },
    );
    store.limiter(|state| &mut state.limits);
    if let Some(fuel) = config.fuel_limit {
        store
            .set_fuel(fuel)
            .map_err(|e| InstantiationError::Store(format!("{:#}", e)))?;
    }

    // 3. Link the POSIX-like shim and instantiate
    let mut linker: Linker<HostState> = Linker::new(module.engine());
    preview1::add_to_linker_sync(&mut linker, |state: &mut HostState| &mut state.wasi)
        .map_err(|e| InstantiationError::Link(format!("{:#}", e)))?;

    let instance = linker
        .instantiate(&mut store, module.module())
        .map_err(|e| {
            if e.downcast_ref::<Trap>().is_some() {
                InstantiationError::InitTrap(CallTrapError::from_call("start", e))
            } else {
                InstantiationError::Link(format!("{:#}", e))
            }
        })?;

    // 4. Resolve memory
    let memory = instance
        .get_memory(&mut store, MEMORY_EXPORT)
        .map(GuestMemory::new)
        .ok_or(InstantiationError::MissingMemory)?;

    let mut instance = Instance {
        name: env.name.clone(),
        store,
        instance,
        memory,
        stdout,
        stderr,
        fuel_limit: config.fuel_limit,
    };

    // 5. Reactor initialization
    if instance.has_export(INITIALIZE_EXPORT) {
        let init = instance.typed_func::<(), ()>(INITIALIZE_EXPORT)?;
        init.call(&mut instance.store, ())
            .map_err(|e| InstantiationError::InitTrap(CallTrapError::from_call(INITIALIZE_EXPORT, e)))?;
    }

    debug!(
        name = %instance.name,
        memory_bytes = instance.memory.size(&instance.store),
        "instance created"
    );
    Ok(instance)
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bounds-checked accessor for the exported memory.
    pub fn memory(&self) -> GuestMemory {
        self.memory
    }

    pub fn store(&self) -> &Store<HostState> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }

    /// Current linear memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.size(&self.store)
    }

    pub fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_export(&mut self.store, name).is_some()
    }

    /// Resolve a typed export, distinguishing "missing" from "wrong type".
    pub fn typed_func<Params, Results>(
        &mut self,
        name: &str,
    ) -> Result<TypedFunc<Params, Results>, InstantiationError>
    where
        Params: WasmParams,
        Results: WasmResults,
    {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| InstantiationError::MissingExport {
                name: name.to_string(),
            })?;
        func.typed::<Params, Results>(&self.store)
            .map_err(|e| InstantiationError::ExportSignature {
                name: name.to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Run the command entry point `_start`.
    ///
    /// A WASI `proc_exit(0)` counts as normal completion.
    pub fn run_start(&mut self) -> Result<(), CallTrapError> {
        let start = self.typed_func::<(), ()>(START_EXPORT).map_err(|e| CallTrapError {
            export: START_EXPORT.to_string(),
            kind: TrapKind::Trap(e.to_string()),
        })?;
        match start.call(&mut self.store, ()) {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = CallTrapError::from_call(START_EXPORT, e);
                if err.exit_code() == Some(0) {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Release the instance and return what it captured.
    ///
    /// Consumes the instance, so it runs at most once; dropping an instance
    /// without calling this releases the store all the same.
    pub fn teardown(self) -> TeardownReport {
        let fuel_consumed = match self.fuel_limit {
            Some(limit) => match self.store.get_fuel() {
                Ok(remaining) => Some(limit.saturating_sub(remaining)),
                Err(e) => {
                    warn!(name = %self.name, error = %e, "failed to read remaining fuel");
                    None
                }
            },
            None => None,
        };
        let report = TeardownReport {
            name: self.name,
            stdout: self.stdout.map(|p| p.contents().to_vec()),
            stderr: self.stderr.map(|p| p.contents().to_vec()),
            fuel_consumed,
        };
        debug!(
            name = %report.name,
            stdout_bytes = report.stdout.as_ref().map_or(0, Vec::len),
            stderr_bytes = report.stderr.as_ref().map_or(0, Vec::len),
            fuel_consumed = ?report.fuel_consumed,
            "instance torn down"
        );
        // self.store drops here, releasing linear memory and WASI handles
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::loader::{compile, Loader};

    const WRITE_HELLO: &str = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 8) "hello\n")
            (func (export "_start")
                (i32.store (i32.const 0) (i32.const 8))
                (i32.store (i32.const 4) (i32.const 6))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 20))))
        )
    "#;

    #[test]
    fn test_instantiate_and_capture_stdout() {
        let module = compile(WRITE_HELLO.as_bytes()).unwrap();
        let mut instance = instantiate(&module, &EnvironmentConfig::captured("hello")).unwrap();
        assert_eq!(instance.name(), "hello");
        assert_eq!(instance.memory_size(), 65536);

        instance.run_start().unwrap();
        let report = instance.teardown();
        assert_eq!(report.name, "hello");
        assert_eq!(report.stdout.as_deref(), Some(&b"hello\n"[..]));
        assert_eq!(report.stderr.as_deref(), Some(&b""[..]));
        assert_eq!(report.fuel_consumed, None);
    }

    #[test]
    fn test_null_sink_reports_nothing() {
        let module = compile(WRITE_HELLO.as_bytes()).unwrap();
        let env = EnvironmentConfig::captured("hello").with_stdout(OutputSink::Null);
        let mut instance = instantiate(&module, &env).unwrap();
        instance.run_start().unwrap();
        let report = instance.teardown();
        assert_eq!(report.stdout, None);
    }

    #[test]
    fn test_missing_import_is_link_error() {
        let wat = r#"
            (module
                (import "env" "host_thing" (func (result i32)))
                (memory (export "memory") 1)
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();
        let err = instantiate(&module, &EnvironmentConfig::captured("t")).err().unwrap();
        assert!(matches!(err, InstantiationError::Link(ref m) if m.contains("host_thing")));
    }

    #[test]
    fn test_missing_memory() {
        let wat = r#"(module (func (export "_start")))"#;
        let module = compile(wat.as_bytes()).unwrap();
        let err = instantiate(&module, &EnvironmentConfig::captured("t")).err().unwrap();
        assert!(matches!(err, InstantiationError::MissingMemory));
    }

    #[test]
    fn test_start_function_trap() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func $boom unreachable)
                (start $boom)
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();
        let err = instantiate(&module, &EnvironmentConfig::captured("t")).err().unwrap();
        assert!(matches!(err, InstantiationError::InitTrap(_)));
    }

    #[test]
    fn test_initialize_runs_at_instantiate() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "_initialize")
                    (i32.store (i32.const 0) (i32.const 42)))
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();
        let instance = instantiate(&module, &EnvironmentConfig::captured("t")).unwrap();
        assert_eq!(instance.memory().read_u32(instance.store(), 0).unwrap(), 42);
    }

    #[test]
    fn test_initialize_trap() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "_initialize") unreachable)
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();
        let err = instantiate(&module, &EnvironmentConfig::captured("t")).err().unwrap();
        match err {
            InstantiationError::InitTrap(trap) => assert_eq!(trap.export, "_initialize"),
            e => panic!("expected InitTrap, got: {:?}", e),
        }
    }

    #[test]
    fn test_typed_func_errors() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "f") (param i32) (result i32) local.get 0)
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();
        let mut instance = instantiate(&module, &EnvironmentConfig::captured("t")).unwrap();
        assert!(instance.typed_func::<u32, u32>("f").is_ok());
        assert!(matches!(
            instance.typed_func::<(u32, u32), u32>("f"),
            Err(InstantiationError::ExportSignature { .. })
        ));
        assert!(matches!(
            instance.typed_func::<(), ()>("g"),
            Err(InstantiationError::MissingExport { .. })
        ));
    }

    #[test]
    fn test_proc_exit_codes() {
        let wat = r#"
            (module
                (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
                (memory (export "memory") 1)
                (global $code (mut i32) (i32.const 0))
                (func (export "set_code") (param i32) (global.set $code (local.get 0)))
                (func (export "_start") (call $exit (global.get $code)))
            )
        "#;
        let module = compile(wat.as_bytes()).unwrap();

        let mut instance = instantiate(&module, &EnvironmentConfig::captured("t")).unwrap();
        instance.run_start().unwrap();

        let mut instance = instantiate(&module, &EnvironmentConfig::captured("t")).unwrap();
        let set_code = instance.typed_func::<u32, ()>("set_code").unwrap();
        set_code.call(instance.store_mut(), 3).unwrap();
        let err = instance.run_start().unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_fuel_is_reported() {
        let loader = Loader::new(BridgeConfig {
            fuel_limit: Some(1_000_000),
            ..BridgeConfig::default()
        })
        .unwrap();
        let module = loader.compile(WRITE_HELLO.as_bytes()).unwrap();
        let mut instance = instantiate(&module, &EnvironmentConfig::captured("t")).unwrap();
        instance.run_start().unwrap();
        let report = instance.teardown();
        assert!(report.fuel_consumed.unwrap() > 0);
    }

    #[test]
    fn test_memory_limit_enforced() {
        let loader = Loader::new(BridgeConfig {
            max_memory_pages: 1,
            ..BridgeConfig::default()
        })
        .unwrap();
        let wat = r#"(module (memory (export "memory") 2))"#;
        let module = loader.compile(wat.as_bytes()).unwrap();
        assert!(instantiate(&module, &EnvironmentConfig::captured("t")).is_err());
    }
}

//! Script engines: the execution strategies behind `ScriptEngine`.
//!
//! - [`BridgeEngine`] drives the compile/invoke export protocol and returns
//!   the bytes the guest describes through its result descriptor.
//! - [`CommandEngine`] runs the module's `_start` entry point with the script
//!   passed in argv, and returns what the guest wrote to stdout.
//!
//! [`Engine`] picks one of them from an [`ExecutionMode`] at composition time.

use tracing::{debug, warn};

use guestjs_hostapi::{EnvironmentConfig, ExecutionMode, OutputSink, ScriptEngine};

use crate::error::RuntimeError;
use crate::instance::instantiate;
use crate::loader::CompiledModule;
use crate::protocol::{with_bridge_instance, CallSequence, OutputBytes};
use crate::validation::validate_command_abi;

/// Script flags used when none are configured: evaluate the next argument.
pub const DEFAULT_SCRIPT_FLAGS: &[&str] = &["-e"];

/// Runs scripts through the guest's compile and invoke exports.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
    module: CompiledModule,
    env: EnvironmentConfig,
}

impl BridgeEngine {
    pub fn new(module: CompiledModule, env: EnvironmentConfig) -> Self {
        Self { module, env }
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Run only the compile phase on a fresh instance and return the bytecode.
    pub fn compile_script(&self, source: &str) -> Result<Vec<u8>, RuntimeError> {
        with_bridge_instance(&self.module, &self.env, |instance, names| {
            let mut seq = CallSequence::new(instance, names)?;
            seq.load_source(source.as_bytes())?;
            Ok(seq.compile()?.to_vec())
        })
    }

    /// Run only the invoke phase on a fresh instance with `bytecode` from an
    /// earlier `compile_script`.
    pub fn invoke_bytecode(&self, bytecode: &[u8]) -> Result<OutputBytes, RuntimeError> {
        with_bridge_instance(&self.module, &self.env, |instance, names| {
            let mut seq = CallSequence::new(instance, names)?;
            seq.load_precompiled(bytecode.to_vec())?;
            seq.load_bytecode()?;
            seq.invoke()?;
            seq.take_output()
        })
    }
}

impl ScriptEngine for BridgeEngine {
    type Error = RuntimeError;

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Bridge
    }

    fn execute(&self, source: &str) -> Result<OutputBytes, RuntimeError> {
        with_bridge_instance(&self.module, &self.env, |instance, names| {
            CallSequence::new(instance, names)?.execute(source.as_bytes())
        })
    }
}

/// Runs scripts by handing them to the guest's command entry point.
///
/// argv is `[program, flags..., source]`, where `program` is the first
/// configured argv element or the environment name. Stdout is always
/// captured and returned as the output; stderr follows the environment.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    module: CompiledModule,
    env: EnvironmentConfig,
    script_flags: Vec<String>,
}

impl CommandEngine {
    pub fn new(module: CompiledModule, env: EnvironmentConfig) -> Self {
        Self {
            module,
            env,
            script_flags: DEFAULT_SCRIPT_FLAGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the flags placed between the program name and the source.
    pub fn with_script_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// The argv the guest sees for `source`.
    pub fn argv_for(&self, source: &str) -> Vec<String> {
        let program = self
            .env
            .argv
            .first()
            .cloned()
            .unwrap_or_else(|| self.env.name.clone());
        let mut argv = Vec::with_capacity(self.script_flags.len() + 2);
        argv.push(program);
        argv.extend(self.script_flags.iter().cloned());
        argv.push(source.to_string());
        argv
    }
}

impl ScriptEngine for CommandEngine {
    type Error = RuntimeError;

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Command
    }

    fn execute(&self, source: &str) -> Result<OutputBytes, RuntimeError> {
        validate_command_abi(self.module.module())?;

        let env = self
            .env
            .clone()
            .with_stdout(OutputSink::Capture)
            .with_argv(self.argv_for(source));
        let mut instance = instantiate(&self.module, &env)?;
        let result = instance.run_start();
        let report = instance.teardown();

        if let Err(e) = result {
            warn!(name = %report.name, error = %e, "command run failed");
            return Err(RuntimeError::Command(e));
        }
        let output = report.stdout.unwrap_or_default();
        debug!(name = %report.name, output_len = output.len(), "command run finished");
        Ok(output)
    }
}

/// An execution strategy chosen at composition time.
#[derive(Debug, Clone)]
pub enum Engine {
    Bridge(BridgeEngine),
    Command(CommandEngine),
}

impl Engine {
    /// Build the engine for `mode` over `module`.
    pub fn for_mode(mode: ExecutionMode, module: CompiledModule, env: EnvironmentConfig) -> Self {
        match mode {
            ExecutionMode::Bridge => Self::Bridge(BridgeEngine::new(module, env)),
            ExecutionMode::Command => Self::Command(CommandEngine::new(module, env)),
        }
    }

    /// Set command-mode script flags; no effect on the bridge strategy.
    pub fn with_script_flags<I, S>(self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            Self::Command(engine) => Self::Command(engine.with_script_flags(flags)),
            other => other,
        }
    }
}

impl ScriptEngine for Engine {
    type Error = RuntimeError;

    fn mode(&self) -> ExecutionMode {
        match self {
            Self::Bridge(e) => e.mode(),
            Self::Command(e) => e.mode(),
        }
    }

    fn execute(&self, source: &str) -> Result<OutputBytes, RuntimeError> {
        match self {
            Self::Bridge(e) => e.execute(source),
            Self::Command(e) => e.execute(source),
        }
    }
}

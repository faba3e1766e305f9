//! Host-side configuration types for a single guest execution.
//!
//! `EnvironmentConfig` is handed to the instantiation host for every new
//! instance. Defaults mirror a command-line process: stdio inherited from the
//! host, no argv beyond what the caller supplies, no environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Default diagnostic name for a guest instance.
pub const DEFAULT_INSTANCE_NAME: &str = "guest";

/// Where a guest's standard input comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StdinSource {
    /// Read from the host process's stdin.
    #[default]
    Inherit,
    /// Always at end of stream.
    Null,
    /// A fixed in-memory byte sequence.
    Bytes(Vec<u8>),
}

/// Where a guest's standard output or standard error goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputSink {
    /// Write to the host process's corresponding stream.
    #[default]
    Inherit,
    /// Discard everything.
    Null,
    /// Buffer in memory; returned to the caller at teardown.
    Capture,
}

/// Host environment for one guest instantiation.
///
/// Cloned into every instance; nothing in it is shared between instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Diagnostic identity, used in logs and as the default `argv[0]`.
    pub name: String,
    /// Standard input wiring.
    pub stdin: StdinSource,
    /// Standard output wiring.
    pub stdout: OutputSink,
    /// Standard error wiring.
    pub stderr: OutputSink,
    /// Arguments visible to the guest entry point, `argv[0]` included.
    pub argv: Vec<String>,
    /// Environment variables visible to the guest.
    pub env: Vec<(String, String)>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            stdin: StdinSource::Inherit,
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
            argv: Vec::new(),
            env: Vec::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Create a config with the given diagnostic name and default stdio.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A fully isolated environment: empty stdin, stdout and stderr captured.
    pub fn captured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stdin: StdinSource::Null,
            stdout: OutputSink::Capture,
            stderr: OutputSink::Capture,
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_stdout(mut self, stdout: OutputSink) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn with_stderr(mut self, stderr: OutputSink) -> Self {
        self.stderr = stderr;
        self
    }

    /// Replace argv. The first element is conventionally the program name.
    pub fn with_argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable.
    ///
    /// Returns `Err(InvalidEnvName)` if `key` is empty or contains `=`.
    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        if key.is_empty() || key.contains('=') {
            return Err(ConfigError::InvalidEnvName(key));
        }
        self.env.push((key, value.into()));
        Ok(self)
    }

    /// The argv the guest will see: `argv` if set, otherwise `[name]`.
    pub fn effective_argv(&self) -> Vec<String> {
        if self.argv.is_empty() {
            vec![self.name.clone()]
        } else {
            self.argv.clone()
        }
    }
}

/// Execution strategy for a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Compile-then-invoke through guest exports and guest memory.
    #[default]
    Bridge,
    /// Run the module's command entry point with the script in argv.
    Command,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "command" => Ok(Self::Command),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Everything needed to run one script: which module, which source, how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub module_path: PathBuf,
    pub source_path: PathBuf,
    pub mode: ExecutionMode,
}

impl RunPlan {
    pub fn new(
        module_path: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            module_path: module_path.into(),
            source_path: source_path.into(),
            mode,
        }
    }
}

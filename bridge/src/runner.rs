//! Run plans: load a module file and a script file, then execute.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use guestjs_hostapi::{EnvironmentConfig, RunPlan, ScriptEngine};

use crate::config::BridgeConfig;
use crate::engine::{Engine, DEFAULT_SCRIPT_FLAGS};
use crate::error::{LoadError, RunError};
use crate::loader::Loader;
use crate::protocol::OutputBytes;

/// Outcome of a repeated run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Output of the last run. Every run must succeed for a summary to exist.
    pub output: OutputBytes,
    pub runs: u32,
    pub compile_time: Duration,
    pub total_run_time: Duration,
}

impl RunSummary {
    pub fn mean_run_time(&self) -> Duration {
        if self.runs == 0 {
            return Duration::ZERO;
        }
        self.total_run_time / self.runs
    }
}

/// Executes [`RunPlan`]s with one loader and one environment.
pub struct Runner {
    loader: Loader,
    env: EnvironmentConfig,
    script_flags: Vec<String>,
}

impl Runner {
    pub fn new(config: BridgeConfig, env: EnvironmentConfig) -> Result<Self, LoadError> {
        Ok(Self {
            loader: Loader::new(config)?,
            env,
            script_flags: DEFAULT_SCRIPT_FLAGS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Flags passed before the source in command mode.
    pub fn with_script_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Load, compile and run `plan` once.
    pub fn run_plan(&self, plan: &RunPlan) -> Result<OutputBytes, RunError> {
        Ok(self.run_plan_repeated(plan, 1)?.output)
    }

    /// Compile the module once, then run the script `iterations` times on
    /// fresh instances. Zero iterations is treated as one.
    pub fn run_plan_repeated(&self, plan: &RunPlan, iterations: u32) -> Result<RunSummary, RunError> {
        let iterations = iterations.max(1);
        let source = read_source(&plan.source_path)?;

        let started = Instant::now();
        let module = self.loader.compile_file(&plan.module_path)?;
        let compile_time = started.elapsed();

        let engine = Engine::for_mode(plan.mode, module, self.env.clone())
            .with_script_flags(self.script_flags.iter().cloned());

        let mut output = OutputBytes::new();
        let mut total_run_time = Duration::ZERO;
        for run in 0..iterations {
            let started = Instant::now();
            output = engine.execute(&source)?;
            let elapsed = started.elapsed();
            total_run_time += elapsed;
            debug!(run, elapsed_us = elapsed.as_micros() as u64, "run finished");
        }

        info!(
            module = %plan.module_path.display(),
            mode = %plan.mode,
            runs = iterations,
            compile_ms = compile_time.as_millis() as u64,
            run_ms = total_run_time.as_millis() as u64,
            output_len = output.len(),
            "plan finished"
        );
        Ok(RunSummary {
            output,
            runs: iterations,
            compile_time,
            total_run_time,
        })
    }
}

fn read_source(path: &Path) -> Result<String, RunError> {
    let bytes = std::fs::read(path).map_err(|source| RunError::Source {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| RunError::SourceEncoding {
        path: path.to_path_buf(),
    })
}

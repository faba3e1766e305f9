//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::Parser;

use guestjs_bridge::BridgeConfig;
use guestjs_hostapi::{EnvironmentConfig, ExecutionMode, RunPlan};

/// Run a script inside a WASM-hosted script engine
#[derive(Parser, Debug)]
#[command(name = "guestjs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// WASM module embedding the script engine (binary or text format)
    pub module: PathBuf,

    /// Script source file
    pub source: PathBuf,

    /// Execution strategy: bridge (compile/invoke exports) or command (_start with argv)
    #[arg(short, long, default_value = "bridge", env = "GUESTJS_MODE")]
    pub mode: ExecutionMode,

    /// Diagnostic name of the guest instance, also its argv[0]
    #[arg(short, long, default_value = guestjs_hostapi::types::DEFAULT_INSTANCE_NAME)]
    pub name: String,

    /// Argument placed before the source in command mode (repeatable; default: -e)
    #[arg(long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
    pub flags: Vec<String>,

    /// Run the script this many times on fresh instances
    #[arg(short, long, default_value_t = 1)]
    pub repeat: u32,

    /// Fuel budget per instance (unlimited when omitted)
    #[arg(long, env = "GUESTJS_FUEL")]
    pub fuel: Option<u64>,

    /// Maximum linear memory per instance, in 64 KiB pages
    #[arg(long, default_value_t = BridgeConfig::default().max_memory_pages)]
    pub max_memory_pages: u32,

    /// Generate native debug info for guest code
    #[arg(long)]
    pub debug_info: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            max_memory_pages: self.max_memory_pages,
            fuel_limit: self.fuel,
            debug_info: self.debug_info,
            ..BridgeConfig::default()
        }
    }

    pub fn environment(&self) -> EnvironmentConfig {
        EnvironmentConfig::new(&self.name)
    }

    pub fn plan(&self) -> RunPlan {
        RunPlan::new(&self.module, &self.source, self.mode)
    }
}

//! `guestjs-hostapi`: host-side types for running scripts inside a WASM guest.
//!
//! This crate describes what the host hands to a guest execution without
//! depending on any particular runtime. It provides:
//!
//! - `EnvironmentConfig`: diagnostic name, stdio wiring, argv and env vars
//! - `ExecutionMode`: which execution strategy a run uses
//! - `RunPlan`: a module path, a source path and a mode, bundled
//! - `ScriptEngine` trait: the capability every execution strategy implements
//! - `ConfigError`: parse errors for host-side configuration values
//!
//! The Wasmtime-backed implementation lives in `guestjs-bridge`.

pub mod error;
pub mod types;
pub mod traits;

// Re-export commonly used types at the crate root.
pub use error::ConfigError;
pub use types::{EnvironmentConfig, ExecutionMode, OutputSink, RunPlan, StdinSource};
pub use traits::ScriptEngine;

//! Script engine trait: the capability every execution strategy provides.
//!
//! A caller composes one engine up front (see `ExecutionMode`) and then only
//! talks to it through this trait. Strategies differ in how the script reaches
//! the guest (exported functions vs. argv), not in what the caller sees.

use crate::types::ExecutionMode;

/// Executes script source and returns the bytes it produced.
///
/// The output is opaque to the engine. It is commonly UTF-8 text, but
/// interpretation belongs to the caller.
///
/// Implementations create whatever per-run state they need on each call;
/// two calls with the same source must not observe each other.
pub trait ScriptEngine {
    /// Error type for a failed execution.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The strategy this engine implements.
    fn mode(&self) -> ExecutionMode;

    /// Run `source` to completion and return its output bytes.
    fn execute(&self, source: &str) -> Result<Vec<u8>, Self::Error>;
}

//! `guestjs-bridge`: Wasmtime host for script-engine guests.
//!
//! Loads a WASM module that embeds a script engine and drives it through
//! one of two strategies:
//!
//! - **Bridge:** a two-phase call sequence over the guest's exports. The
//!   source is copied into guest memory, `compile-src` produces bytecode,
//!   the bytecode is copied back in, and `invoke` writes an 8-byte list
//!   descriptor `{data_ptr, len}` that the host reads the output through.
//! - **Command:** the module's `_start` runs with the script in argv, and
//!   whatever it writes to stdout is the output.
//!
//! Every guest pointer is bounds-checked against the current memory size
//! before it is dereferenced, and every instance is torn down after its run.
//!
//! The short path is [`compile`] then [`run`].

pub mod error;
pub mod config;
pub mod memory;
pub mod validation;
pub mod loader;
pub mod instance;
pub mod alloc;
pub mod protocol;
pub mod engine;
pub mod runner;

pub use config::{BridgeConfig, ExportNames};
pub use engine::{BridgeEngine, CommandEngine, Engine};
pub use error::{
    AllocationError, CallError, CallTrapError, InstantiationError, LoadError, OutOfBoundsError,
    Phase, ProtocolError, RunError, RuntimeError, TrapKind,
};
pub use instance::{instantiate, Instance, TeardownReport};
pub use loader::{compile, CompiledModule, Loader};
pub use memory::{GuestMemory, ListDescriptor};
pub use protocol::{execute_in, run, run_with_env, CallSequence, CallState, OutputBytes};
pub use runner::{RunSummary, Runner};

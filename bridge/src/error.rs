//! Bridge error types.
//!
//! Each layer has its own error: `LoadError` for the loader,
//! `InstantiationError` for the instantiation host, `AllocationError` for the
//! guest allocator, `OutOfBoundsError` for memory marshaling, `CallTrapError`
//! for guest traps and `ProtocolError` for inconsistent descriptors.
//! `CallError` groups the per-call failures and `RuntimeError` tags them with
//! the protocol phase they happened in.

use std::fmt;
use std::path::PathBuf;

use wasmtime::Trap;
use wasmtime_wasi::I32Exit;

use crate::protocol::CallState;

/// Which half of the two-phase protocol an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Compile,
    Invoke,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::Invoke => f.write_str("invoke"),
        }
    }
}

/// Module loading failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The image file could not be read.
    #[error("failed to read module image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine could not be built from the configuration.
    #[error("engine configuration rejected: {0}")]
    Engine(String),

    /// Malformed header, invalid section or unsupported proposal.
    #[error("invalid module image: {0:#}")]
    Malformed(#[from] anyhow::Error),

    /// Valid WebAssembly, but outside what the bridge can drive.
    #[error("unsupported module: {0}")]
    Unsupported(String),
}

/// Instantiating a compiled module failed.
#[derive(Debug, thiserror::Error)]
pub enum InstantiationError {
    /// An import could not be satisfied by the host.
    #[error("failed to link module imports: {0}")]
    Link(String),

    /// A named export does not exist.
    #[error("missing required export: {name}")]
    MissingExport { name: String },

    /// A named export exists but has the wrong kind or signature.
    #[error("export '{name}' has wrong signature: {message}")]
    ExportSignature { name: String, message: String },

    /// The module does not export a linear memory named `memory`.
    #[error("module must export 'memory'")]
    MissingMemory,

    /// The store could not be prepared (fuel, limits).
    #[error("store setup failed: {0}")]
    Store(String),

    /// The start function or `_initialize` trapped.
    #[error("guest initialization trapped: {0}")]
    InitTrap(#[source] CallTrapError),

    /// The allocator export could not be resolved.
    #[error(transparent)]
    Allocator(#[from] AllocationError),
}

/// A guest allocation request failed.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The allocator export is missing or has the wrong signature.
    #[error("allocator export unavailable: {0}")]
    Unavailable(String),

    /// The request does not fit in the guest's 32-bit address space.
    #[error("allocation of {size} bytes exceeds the guest address space")]
    TooLarge { size: usize },

    /// The guest allocator returned a null pointer.
    #[error("guest allocator out of memory (requested {size} bytes)")]
    OutOfMemory { size: u32 },

    /// The guest allocator returned a region that is not inside memory.
    #[error("guest allocator returned [{ptr}, {ptr}+{size}) outside memory of {memory_size} bytes")]
    OutOfRange {
        ptr: u32,
        size: u32,
        memory_size: usize,
    },

    /// The allocator call itself trapped.
    #[error("allocator trapped: {0}")]
    Trap(#[source] CallTrapError),
}

/// A memory access fell outside the current linear memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("out of bounds access at offset {offset} (len {len}) for memory of {memory_size} bytes")]
pub struct OutOfBoundsError {
    pub offset: u64,
    pub len: u64,
    pub memory_size: usize,
}

/// How a guest call ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapKind {
    /// Fuel metering stopped the guest.
    OutOfFuel,
    /// The guest requested process exit with this status.
    Exit(i32),
    /// Any other trap, with the runtime's description.
    Trap(String),
}

/// A guest export call trapped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("export '{export}' {kind}")]
pub struct CallTrapError {
    pub export: String,
    pub kind: TrapKind,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFuel => f.write_str("ran out of fuel"),
            Self::Exit(code) => write!(f, "exited with status {}", code),
            Self::Trap(msg) => write!(f, "trapped: {}", msg),
        }
    }
}

impl CallTrapError {
    /// Classify an error returned by a Wasmtime function call.
    pub fn from_call(export: &str, err: anyhow::Error) -> Self {
        let kind = if let Some(exit) = err.downcast_ref::<I32Exit>() {
            TrapKind::Exit(exit.0)
        } else if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
            TrapKind::OutOfFuel
        } else {
            TrapKind::Trap(format!("{:#}", err))
        };
        Self {
            export: export.to_string(),
            kind,
        }
    }

    /// The exit status, if the guest exited rather than trapped.
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            TrapKind::Exit(code) => Some(code),
            _ => None,
        }
    }
}

/// A decoded list descriptor references bytes outside linear memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "descriptor at {descriptor_offset} references [{data_ptr}, {data_ptr}+{len}) beyond memory of {memory_size} bytes"
)]
pub struct ProtocolError {
    pub descriptor_offset: u32,
    pub data_ptr: u32,
    pub len: u32,
    pub memory_size: usize,
}

/// Failure of one step of the compile/invoke protocol.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    OutOfBounds(#[from] OutOfBoundsError),

    #[error(transparent)]
    Trap(#[from] CallTrapError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A protocol step was called out of order.
    #[error("call sequence is in state {found:?}, expected {expected:?}")]
    InvalidState { expected: CallState, found: CallState },
}

/// Top-level error for running a script in a guest.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("instantiation failed: {0}")]
    Instantiation(#[from] InstantiationError),

    #[error("compile phase failed: {0}")]
    CompileFailure(#[source] CallError),

    #[error("invoke phase failed: {0}")]
    InvokeFailure(#[source] CallError),

    /// The command entry point trapped or exited non-zero.
    #[error("command entry point failed: {0}")]
    Command(#[source] CallTrapError),
}

impl RuntimeError {
    /// Wrap a call failure in the variant for `phase`.
    pub fn in_phase(phase: Phase, err: CallError) -> Self {
        match phase {
            Phase::Compile => Self::CompileFailure(err),
            Phase::Invoke => Self::InvokeFailure(err),
        }
    }

    /// The protocol phase the error happened in, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::CompileFailure(_) => Some(Phase::Compile),
            Self::InvokeFailure(_) => Some(Phase::Invoke),
            Self::Instantiation(_) | Self::Command(_) => None,
        }
    }

    /// The underlying call failure, for compile and invoke errors.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            Self::CompileFailure(e) | Self::InvokeFailure(e) => Some(e),
            Self::Instantiation(_) | Self::Command(_) => None,
        }
    }
}

/// Failure of a whole run plan.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to read script source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script source {path} is not valid UTF-8")]
    SourceEncoding { path: PathBuf },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

//! Call orchestrator: the two-phase compile/invoke protocol.
//!
//! ```text
//! Idle ─load_source─▶ SourceLoaded ─compile─▶ Compiled ─load_bytecode─▶ BytecodeLoaded
//!                                                 ▲                           │
//!          Idle ─load_precompiled─────────────────┘                        invoke
//!                                                                             ▼
//!                                         Done ◀─take_output─ Invoked
//! ```
//!
//! Any failure moves the sequence to `Error`. The guest hands back
//! variable-length results through an 8-byte list descriptor; every result is
//! copied into host memory before the next guest call.

use std::time::Instant;

use tracing::{debug, info, warn};
use wasmtime::TypedFunc;

use guestjs_hostapi::EnvironmentConfig;

use crate::alloc::GuestAllocator;
use crate::config::ExportNames;
use crate::error::{CallError, CallTrapError, InstantiationError, Phase, ProtocolError, RuntimeError};
use crate::instance::{instantiate, Instance};
use crate::loader::CompiledModule;
use crate::memory::LIST_DESCRIPTOR_SIZE;
use crate::validation::validate_bridge_abi;

/// Bytes produced by a guest execution. Opaque to the bridge.
pub type OutputBytes = Vec<u8>;

/// Progress of one compile/invoke sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    SourceLoaded,
    Compiled,
    BytecodeLoaded,
    Invoked,
    Done,
    Error,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// A region the host wrote into guest memory.
#[derive(Debug, Clone, Copy)]
struct Region {
    ptr: u32,
    len: u32,
}

/// The guest exports the protocol calls, resolved once per instance.
pub struct BridgeExports {
    names: ExportNames,
    alloc: GuestAllocator,
    compile: TypedFunc<(u32, u32), u32>,
    invoke: TypedFunc<(u32, u32, u32, u32, u32), ()>,
}

impl BridgeExports {
    pub fn resolve(instance: &mut Instance, names: &ExportNames) -> Result<Self, InstantiationError> {
        let alloc = GuestAllocator::resolve(instance, &names.alloc)?;
        let compile = instance.typed_func::<(u32, u32), u32>(&names.compile)?;
        let invoke = instance.typed_func::<(u32, u32, u32, u32, u32), ()>(&names.invoke)?;
        Ok(Self {
            names: names.clone(),
            alloc,
            compile,
            invoke,
        })
    }
}

/// One pass through the protocol on a borrowed instance.
pub struct CallSequence<'a> {
    instance: &'a mut Instance,
    exports: BridgeExports,
    state: CallState,
    source: Option<Region>,
    bytecode: Vec<u8>,
    bytecode_region: Option<Region>,
    output: Vec<u8>,
}

impl<'a> CallSequence<'a> {
    /// Resolve the protocol exports on `instance` and start in `Idle`.
    pub fn new(instance: &'a mut Instance, names: &ExportNames) -> Result<Self, InstantiationError> {
        let exports = BridgeExports::resolve(instance, names)?;
        Ok(Self {
            instance,
            exports,
            state: CallState::Idle,
            source: None,
            bytecode: Vec::new(),
            bytecode_region: None,
            output: Vec::new(),
        })
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// The compiled intermediate form, once `compile` has run.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Allocate guest memory for `source` and copy it in.
    pub fn load_source(&mut self, source: &[u8]) -> Result<(), RuntimeError> {
        self.step(Phase::Compile, CallState::Idle, CallState::SourceLoaded, |seq| {
            let ptr = seq.write_payload(source)?;
            seq.source = Some(Region {
                ptr,
                len: source.len() as u32,
            });
            Ok(())
        })
    }

    /// Call the compile export and copy out the bytecode it describes.
    pub fn compile(&mut self) -> Result<&[u8], RuntimeError> {
        self.step(Phase::Compile, CallState::SourceLoaded, CallState::Compiled, |seq| {
            let source = seq.source.ok_or(CallError::InvalidState {
                expected: CallState::SourceLoaded,
                found: CallState::Idle,
            })?;
            let descriptor_ptr = seq
                .exports
                .compile
                .call(seq.instance.store_mut(), (source.ptr, source.len))
                .map_err(|e| CallTrapError::from_call(&seq.exports.names.compile, e))?;
            seq.bytecode = seq.read_list(descriptor_ptr)?;
            debug!(
                source_len = source.len,
                bytecode_len = seq.bytecode.len(),
                "source compiled"
            );
            Ok(())
        })?;
        Ok(&self.bytecode)
    }

    /// Start from bytecode compiled by an earlier instance.
    pub fn load_precompiled(&mut self, bytecode: Vec<u8>) -> Result<(), RuntimeError> {
        self.step(Phase::Invoke, CallState::Idle, CallState::Compiled, |seq| {
            seq.bytecode = bytecode;
            Ok(())
        })
    }

    /// Allocate guest memory for the bytecode and copy it in.
    pub fn load_bytecode(&mut self) -> Result<(), RuntimeError> {
        self.step(Phase::Invoke, CallState::Compiled, CallState::BytecodeLoaded, |seq| {
            let bytecode = std::mem::take(&mut seq.bytecode);
            let written = seq.write_payload(&bytecode);
            seq.bytecode = bytecode;
            seq.bytecode_region = Some(Region {
                ptr: written?,
                len: seq.bytecode.len() as u32,
            });
            Ok(())
        })
    }

    /// Call the invoke export and copy out the result it describes.
    pub fn invoke(&mut self) -> Result<(), RuntimeError> {
        self.step(Phase::Invoke, CallState::BytecodeLoaded, CallState::Invoked, |seq| {
            let bytecode = seq.bytecode_region.ok_or(CallError::InvalidState {
                expected: CallState::BytecodeLoaded,
                found: CallState::Compiled,
            })?;

            // Zeroed slot: a guest that writes nothing yields an empty result
            let slot = seq.exports.alloc.allocate(seq.instance, LIST_DESCRIPTOR_SIZE as usize)?;
            let memory = seq.instance.memory();
            memory.write_bytes(seq.instance.store_mut(), slot, &[0u8; 8])?;

            // Argument pointer/length are reserved and always empty
            seq.exports
                .invoke
                .call(seq.instance.store_mut(), (slot, bytecode.ptr, bytecode.len, 0, 0))
                .map_err(|e| CallTrapError::from_call(&seq.exports.names.invoke, e))?;

            seq.output = seq.read_list(slot)?;
            debug!(output_len = seq.output.len(), "bytecode invoked");
            Ok(())
        })
    }

    /// Hand the output to the caller and finish the sequence.
    pub fn take_output(&mut self) -> Result<OutputBytes, RuntimeError> {
        self.step(Phase::Invoke, CallState::Invoked, CallState::Done, |seq| {
            Ok(std::mem::take(&mut seq.output))
        })
    }

    /// Run every step from `Idle` to `Done`.
    pub fn execute(&mut self, source: &[u8]) -> Result<OutputBytes, RuntimeError> {
        self.load_source(source)?;
        self.compile()?;
        self.load_bytecode()?;
        self.invoke()?;
        self.take_output()
    }

    /// Check the state, run `f`, then move to `next` or `Error`.
    fn step<T>(
        &mut self,
        phase: Phase,
        expected: CallState,
        next: CallState,
        f: impl FnOnce(&mut Self) -> Result<T, CallError>,
    ) -> Result<T, RuntimeError> {
        if self.state != expected {
            let found = self.state;
            self.state = CallState::Error;
            return Err(RuntimeError::in_phase(
                phase,
                CallError::InvalidState { expected, found },
            ));
        }
        match f(self) {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                self.state = CallState::Error;
                Err(RuntimeError::in_phase(phase, e))
            }
        }
    }

    /// Allocate `payload.len()` bytes in the guest and copy `payload` there.
    fn write_payload(&mut self, payload: &[u8]) -> Result<u32, CallError> {
        let ptr = self.exports.alloc.allocate(self.instance, payload.len())?;
        if !payload.is_empty() {
            let memory = self.instance.memory();
            memory.write_bytes(self.instance.store_mut(), ptr, payload)?;
        }
        Ok(ptr)
    }

    /// Decode the descriptor at `offset` and copy out the bytes it references.
    fn read_list(&self, offset: u32) -> Result<Vec<u8>, CallError> {
        let memory = self.instance.memory();
        let store = self.instance.store();
        let descriptor = memory.read_list_descriptor(store, offset)?;
        let memory_size = memory.size(store);
        if !descriptor.fits(memory_size) {
            return Err(ProtocolError {
                descriptor_offset: offset,
                data_ptr: descriptor.data_ptr,
                len: descriptor.len,
                memory_size,
            }
            .into());
        }
        Ok(memory.read_bytes(store, descriptor.data_ptr, descriptor.len)?)
    }
}

/// Run `source` through compile and invoke on an existing instance.
pub fn execute_in(
    instance: &mut Instance,
    names: &ExportNames,
    source: &[u8],
) -> Result<OutputBytes, RuntimeError> {
    CallSequence::new(instance, names)?.execute(source)
}

/// Compile and invoke `source` on a fresh instance of `module` with default
/// stdio.
pub fn run(module: &CompiledModule, source: &str) -> Result<OutputBytes, RuntimeError> {
    run_with_env(module, &EnvironmentConfig::default(), source.as_bytes())
}

/// Compile and invoke `source` on a fresh instance created with `env`.
///
/// The instance is torn down on every path, including failures partway
/// through the sequence.
pub fn run_with_env(
    module: &CompiledModule,
    env: &EnvironmentConfig,
    source: &[u8],
) -> Result<OutputBytes, RuntimeError> {
    with_bridge_instance(module, env, |instance, names| execute_in(instance, names, source))
}

/// Instantiate, check the protocol exports, run `f`, and always tear down.
pub(crate) fn with_bridge_instance<T>(
    module: &CompiledModule,
    env: &EnvironmentConfig,
    f: impl FnOnce(&mut Instance, &ExportNames) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let names = &module.config().exports;
    validate_bridge_abi(module.module(), names)?;

    let started = Instant::now();
    let mut instance = instantiate(module, env)?;
    let result = f(&mut instance, names);
    let report = instance.teardown();

    match &result {
        Ok(_) => info!(
            name = %report.name,
            elapsed_us = started.elapsed().as_micros() as u64,
            "bridge run finished"
        ),
        Err(e) => warn!(name = %report.name, error = %e, "bridge run failed"),
    }
    result
}

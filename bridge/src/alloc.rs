//! Guest allocator bridge.
//!
//! The host never carves regions out of guest memory itself. It asks the
//! guest's canonical-ABI allocator export for fresh memory:
//! `alloc(old_ptr = 0, old_size = 0, align = 1, new_size)`. The guest
//! allocator owns the region for the rest of the instance's lifetime; the
//! host only writes inside the span it asked for.

use tracing::trace;
use wasmtime::TypedFunc;

use crate::error::{AllocationError, CallTrapError};
use crate::instance::Instance;

/// Alignment requested for every host allocation. Payloads are byte strings.
pub const ALLOC_ALIGN: u32 = 1;

/// A resolved handle to the guest allocator export.
#[derive(Clone)]
pub struct GuestAllocator {
    export: String,
    func: TypedFunc<(u32, u32, u32, u32), u32>,
}

impl GuestAllocator {
    /// Resolve the allocator export named `export` on `instance`.
    pub fn resolve(instance: &mut Instance, export: &str) -> Result<Self, AllocationError> {
        let func = instance
            .typed_func::<(u32, u32, u32, u32), u32>(export)
            .map_err(|e| AllocationError::Unavailable(e.to_string()))?;
        Ok(Self {
            export: export.to_string(),
            func,
        })
    }

    pub fn export(&self) -> &str {
        &self.export
    }

    /// Request `size` bytes of fresh guest memory and return its offset.
    ///
    /// A zero-size request is passed through; the guest may return any
    /// pointer for it, including 0.
    pub fn allocate(&self, instance: &mut Instance, size: usize) -> Result<u32, AllocationError> {
        let size = u32::try_from(size).map_err(|_| AllocationError::TooLarge { size })?;

        let ptr = self
            .func
            .call(instance.store_mut(), (0, 0, ALLOC_ALIGN, size))
            .map_err(|e| AllocationError::Trap(CallTrapError::from_call(&self.export, e)))?;

        if size == 0 {
            trace!(ptr, "zero-size allocation");
            return Ok(ptr);
        }
        if ptr == 0 {
            return Err(AllocationError::OutOfMemory { size });
        }

        // The guest may have grown memory while allocating; check against now.
        let memory_size = instance.memory_size();
        if ptr as u64 + size as u64 > memory_size as u64 {
            return Err(AllocationError::OutOfRange {
                ptr,
                size,
                memory_size,
            });
        }

        trace!(ptr, size, "guest allocation");
        Ok(ptr)
    }
}

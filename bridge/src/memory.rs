//! Bounds-checked access to guest linear memory.
//!
//! Every function validates `[offset, offset+len)` against the memory size
//! before touching it and returns an `OutOfBoundsError` otherwise. Reads
//! always copy into a host-owned `Vec<u8>`: the guest may reuse or free the
//! source region on its next call.
//!
//! The slice-level functions work on any `&[u8]`; [`GuestMemory`] applies
//! them to a live Wasmtime memory.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Memory};

use crate::error::OutOfBoundsError;

/// Size in bytes of an encoded [`ListDescriptor`].
pub const LIST_DESCRIPTOR_SIZE: u32 = 8;

/// A `{data_ptr, len}` pair the guest writes into its own memory to hand a
/// variable-length result back to the host.
///
/// Wire layout: `[u32 LE data_ptr][u32 LE len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListDescriptor {
    pub data_ptr: u32,
    pub len: u32,
}

impl ListDescriptor {
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self {
            data_ptr: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.data_ptr.to_le_bytes());
        out[4..].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    /// A zero-length descriptor is a valid empty result.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last referenced byte.
    pub fn end(&self) -> u64 {
        self.data_ptr as u64 + self.len as u64
    }

    /// Whether the referenced bytes lie inside a memory of `mem_size` bytes.
    pub fn fits(&self, mem_size: usize) -> bool {
        self.is_empty() || self.end() <= mem_size as u64
    }
}

/// Validate `[offset, offset+len)` against `mem_size` and return it as a
/// slice range.
pub fn check_range(mem_size: usize, offset: u32, len: u64) -> Result<Range<usize>, OutOfBoundsError> {
    let err = || OutOfBoundsError {
        offset: offset as u64,
        len,
        memory_size: mem_size,
    };
    let end = (offset as u64).checked_add(len).ok_or_else(err)?;
    if end > mem_size as u64 {
        return Err(err());
    }
    Ok(offset as usize..end as usize)
}

/// Read `len` bytes from guest memory at `ptr`.
///
/// `len == 0` yields an empty vector whatever `ptr` is.
pub fn read_bytes(mem: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>, OutOfBoundsError> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let range = check_range(mem.len(), ptr, len as u64)?;
    Ok(mem[range].to_vec())
}

/// Write `data` into guest memory at `offset`.
pub fn write_bytes(mem: &mut [u8], offset: u32, data: &[u8]) -> Result<(), OutOfBoundsError> {
    let range = check_range(mem.len(), offset, data.len() as u64)?;
    mem[range].copy_from_slice(data);
    Ok(())
}

/// Read a little-endian u32 at `offset`.
pub fn read_u32(mem: &[u8], offset: u32) -> Result<u32, OutOfBoundsError> {
    let range = check_range(mem.len(), offset, 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&mem[range]);
    Ok(u32::from_le_bytes(bytes))
}

/// Write a little-endian u32 at `offset`.
pub fn write_u32(mem: &mut [u8], offset: u32, value: u32) -> Result<(), OutOfBoundsError> {
    write_bytes(mem, offset, &value.to_le_bytes())
}

/// Decode the list descriptor stored at `offset`.
pub fn read_list_descriptor(mem: &[u8], offset: u32) -> Result<ListDescriptor, OutOfBoundsError> {
    let len_offset = offset.checked_add(4).ok_or(OutOfBoundsError {
        offset: offset as u64,
        len: LIST_DESCRIPTOR_SIZE as u64,
        memory_size: mem.len(),
    })?;
    Ok(ListDescriptor {
        data_ptr: read_u32(mem, offset)?,
        len: read_u32(mem, len_offset)?,
    })
}

/// Bounds-checked accessor over one instance's exported linear memory.
///
/// Holds only the memory handle; the store is passed to every call so that
/// the size check always sees the memory as it is now, after any growth the
/// guest performed in between.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory {
    memory: Memory,
}

impl GuestMemory {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Current memory size in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(&store)
    }

    pub fn write_bytes(
        &self,
        mut store: impl AsContextMut,
        offset: u32,
        data: &[u8],
    ) -> Result<(), OutOfBoundsError> {
        write_bytes(self.memory.data_mut(&mut store), offset, data)
    }

    pub fn read_bytes(
        &self,
        store: impl AsContext,
        ptr: u32,
        len: u32,
    ) -> Result<Vec<u8>, OutOfBoundsError> {
        read_bytes(self.memory.data(&store), ptr, len)
    }

    pub fn read_u32(&self, store: impl AsContext, offset: u32) -> Result<u32, OutOfBoundsError> {
        read_u32(self.memory.data(&store), offset)
    }

    pub fn read_list_descriptor(
        &self,
        store: impl AsContext,
        offset: u32,
    ) -> Result<ListDescriptor, OutOfBoundsError> {
        read_list_descriptor(self.memory.data(&store), offset)
    }
}

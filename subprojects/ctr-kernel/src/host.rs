//! In-memory kernel backend.
//!
//! [`HostKernel`] models a single client process: one handle table, one
//! process id and a list of memory regions the process may lend out as IPC
//! buffers. [`HostMemory`] is a plain word array standing in for the calling
//! thread's control-buffer region.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::{
    BufferPermissions, ControlMemory, Handle, Kernel, KernelError, MappedView, ObjectRef,
    ProcessId, VAddr,
};

/// Maximum number of live handles in a host handle table.
pub const HANDLE_TABLE_CAPACITY: usize = 0x1000;

/// First handle value issued by a host handle table.
const FIRST_HANDLE: u32 = 0x8001;

/// Single-process kernel backed by an in-memory handle table.
#[derive(Debug)]
pub struct HostKernel {
    process_id: ProcessId,
    table: Mutex<HandleTable>,
    regions: RwLock<Vec<MemoryRegion>>,
}

#[derive(Debug)]
struct HandleTable {
    next: u32,
    objects: HashMap<Handle, ObjectRef>,
}

/// A range of client memory that may be mapped for IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Start address.
    pub address: VAddr,
    /// Length in bytes.
    pub size: u32,
    /// Permissions the region grants.
    pub perms: BufferPermissions,
}

impl MemoryRegion {
    fn contains(&self, address: VAddr, size: u32) -> bool {
        let start = address as u64;
        let end = start + size as u64;
        start >= self.address as u64 && end <= self.address as u64 + self.size as u64
    }
}

impl HostKernel {
    /// Creates a kernel for the process `process_id` with an empty handle table
    /// and no mappable memory.
    pub fn new(process_id: ProcessId) -> Self {
        Self {
            process_id,
            table: Mutex::new(HandleTable {
                next: FIRST_HANDLE,
                objects: HashMap::new(),
            }),
            regions: RwLock::new(Vec::new()),
        }
    }

    /// Makes `[address, address + size)` mappable with at most `perms`.
    pub fn add_region(&self, address: VAddr, size: u32, perms: BufferPermissions) {
        self.regions.write().push(MemoryRegion {
            address,
            size,
            perms,
        });
    }

    /// Returns `true` if `handle` is live in the handle table.
    pub fn contains(&self, handle: Handle) -> bool {
        self.table.lock().objects.contains_key(&handle)
    }

    /// Returns the number of live handles.
    pub fn handle_count(&self) -> usize {
        self.table.lock().objects.len()
    }
}

impl Kernel for HostKernel {
    fn resolve_handle(&self, handle: Handle) -> Result<ObjectRef, KernelError> {
        self.table
            .lock()
            .objects
            .get(&handle)
            .cloned()
            .ok_or(KernelError::InvalidHandle(handle))
    }

    fn invalidate_handle(&self, handle: Handle) {
        if self.table.lock().objects.remove(&handle).is_some() {
            log::trace!("closed handle {handle}");
        }
    }

    fn create_handle(&self, object: ObjectRef) -> Result<Handle, KernelError> {
        let mut table = self.table.lock();
        if table.objects.len() >= HANDLE_TABLE_CAPACITY {
            return Err(KernelError::OutOfHandles);
        }

        // Values still live after a wrap-around are skipped
        let mut raw = table.next;
        while table.objects.contains_key(&Handle::from_raw(raw)) {
            raw = next_handle_value(raw);
        }
        table.next = next_handle_value(raw);

        let handle = Handle::from_raw(raw);
        log::trace!("created handle {handle} for {}", object.type_name());
        table.objects.insert(handle, object);
        Ok(handle)
    }

    fn current_process_id(&self) -> ProcessId {
        self.process_id
    }

    fn map_buffer(
        &self,
        address: VAddr,
        size: u32,
        perms: BufferPermissions,
    ) -> Result<MappedView, KernelError> {
        let regions = self.regions.read();
        let region = regions
            .iter()
            .find(|region| region.contains(address, size))
            .ok_or(KernelError::InvalidAddress { address, size })?;

        if !region.perms.contains(perms) {
            return Err(KernelError::WrongPermission {
                address,
                size,
                requested: perms,
            });
        }

        Ok(MappedView {
            address,
            size,
            perms,
        })
    }
}

#[inline]
fn next_handle_value(raw: u32) -> u32 {
    raw.wrapping_add(1).max(FIRST_HANDLE)
}

/// Word-addressed stand-in for a thread's control-buffer region.
///
/// Reads outside the region return zero and writes outside it are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMemory {
    words: Vec<u32>,
}

impl HostMemory {
    /// Creates a zeroed region of `len` words.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len],
        }
    }

    /// Creates a region holding `words`.
    pub fn from_words(words: &[u32]) -> Self {
        Self {
            words: words.to_vec(),
        }
    }

    /// Returns the region contents.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

impl ControlMemory for HostMemory {
    fn len_words(&self) -> usize {
        self.words.len()
    }

    fn read_word(&self, offset: u32) -> u32 {
        match self.words.get(offset as usize / 4) {
            Some(word) => *word,
            None => {
                log::warn!("control memory read outside region at {offset:#x}");
                0
            }
        }
    }

    fn write_word(&mut self, offset: u32, value: u32) {
        match self.words.get_mut(offset as usize / 4) {
            Some(word) => *word = value,
            None => log::warn!("control memory write outside region at {offset:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, sync::Arc};

    use super::*;
    use crate::KernelObject;

    #[derive(Debug)]
    struct Event;

    impl KernelObject for Event {
        fn type_name(&self) -> &'static str {
            "Event"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn created_handles_resolve_until_invalidated() {
        let kernel = HostKernel::new(ProcessId::from_raw(7));
        let handle = kernel.create_handle(Arc::new(Event)).unwrap();

        assert!(handle.is_valid());
        assert!(kernel.resolve_handle(handle).is_ok());

        kernel.invalidate_handle(handle);

        assert_eq!(
            kernel.resolve_handle(handle).unwrap_err(),
            KernelError::InvalidHandle(handle)
        );
    }

    #[test]
    fn handles_are_unique() {
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        let a = kernel.create_handle(Arc::new(Event)).unwrap();
        let b = kernel.create_handle(Arc::new(Event)).unwrap();

        assert_ne!(a, b);
        assert_eq!(kernel.handle_count(), 2);
    }

    #[test]
    fn wrapped_counter_skips_live_handles() {
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        let first = kernel.create_handle(Arc::new(Event)).unwrap();

        kernel.table.lock().next = u32::MAX;
        let last = kernel.create_handle(Arc::new(Event)).unwrap();
        let wrapped = kernel.create_handle(Arc::new(Event)).unwrap();

        assert_eq!(first.to_raw(), FIRST_HANDLE);
        assert_eq!(last.to_raw(), u32::MAX);
        assert_eq!(wrapped.to_raw(), FIRST_HANDLE + 1);
        assert_eq!(kernel.handle_count(), 3);
        assert!(kernel.resolve_handle(first).is_ok());
    }

    #[test]
    fn map_buffer_checks_range_and_permissions() {
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        kernel.add_region(0x1000_0000, 0x1000, BufferPermissions::READ);

        let view = kernel
            .map_buffer(0x1000_0100, 0x100, BufferPermissions::READ)
            .unwrap();
        assert!(view.is_readable());
        assert!(!view.is_writable());

        assert!(matches!(
            kernel.map_buffer(0x1000_0F00, 0x200, BufferPermissions::READ),
            Err(KernelError::InvalidAddress { .. })
        ));
        assert!(matches!(
            kernel.map_buffer(0x1000_0000, 0x10, BufferPermissions::READ_WRITE),
            Err(KernelError::WrongPermission { .. })
        ));
    }

    #[test]
    fn host_memory_ignores_out_of_region_access() {
        let mut memory = HostMemory::new(2);
        memory.write_word(4, 0xAA);
        memory.write_word(8, 0xBB);

        assert_eq!(memory.len_words(), 2);
        assert_eq!(memory.words(), &[0, 0xAA]);
        assert_eq!(memory.read_word(8), 0);
    }
}

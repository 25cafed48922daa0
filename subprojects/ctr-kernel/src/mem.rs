//! Guest memory contracts.
//!
//! The IPC layer touches guest memory in exactly two ways: it reads and writes
//! the words of the calling thread's control (command) buffer, and it asks the
//! kernel to map client buffers named by buffer descriptors.

use bitflags::bitflags;

/// A guest virtual address.
pub type VAddr = u32;

bitflags! {
    /// Access permissions of a buffer mapped for IPC.
    ///
    /// The bit values match the permission field of a mapped-buffer descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct BufferPermissions: u32 {
        /// The server may read the buffer.
        const READ = 1 << 0;
        /// The server may write the buffer.
        const WRITE = 1 << 1;
        /// The server may read and write the buffer.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Word access to the calling context's control-buffer region.
///
/// Offsets are in bytes from the start of the region and are always 4-byte
/// aligned when issued by the IPC layer.
pub trait ControlMemory {
    /// Size of the region in words.
    fn len_words(&self) -> usize;

    /// Reads the word at `offset`.
    fn read_word(&self, offset: u32) -> u32;

    /// Writes `value` to the word at `offset`.
    fn write_word(&mut self, offset: u32, value: u32);
}

/// A client buffer mapped into the server for the duration of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedView {
    /// Client address of the buffer.
    pub address: VAddr,
    /// Length in bytes.
    pub size: u32,
    /// Granted permissions.
    pub perms: BufferPermissions,
}

impl MappedView {
    /// Returns `true` if the server may read the buffer.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.perms.contains(BufferPermissions::READ)
    }

    /// Returns `true` if the server may write the buffer.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.perms.contains(BufferPermissions::WRITE)
    }

    /// Returns the address one past the end of the buffer.
    #[inline]
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }
}

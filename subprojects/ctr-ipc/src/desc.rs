//! Translate descriptor codec.
//!
//! Every translate parameter starts with a descriptor word whose low bits tag
//! its family. The families split in two groups:
//!
//! | Family       | Tag test                        | Payload                          | Words     |
//! |--------------|---------------------------------|----------------------------------|-----------|
//! | CopyHandle   | low nibble 0, bits 4-5 = `00`   | count = bits 26-31 + 1           | 1 + count |
//! | MoveHandle   | low nibble 0, bits 4-5 = `01`   | count = bits 26-31 + 1           | 1 + count |
//! | CallingPid   | low nibble 0, bits 4-5 = `10`   | none                             | 1         |
//! | StaticBuffer | bit 1                           | size (bits 14-31), id (10-13)    | 2         |
//! | PXIBuffer    | bit 2                           | size (8-31), id (4-7), ro (1)    | 1         |
//! | MappedBuffer | bit 3                           | size (4-31), permissions (1-2)   | 2         |
//!
//! Handle descriptors must be recognized first: a zero low nibble is also
//! "no buffer bit set". Mapped and PXI descriptors may carry bit 1 (a
//! permission or read-only flag), so they are tested before static buffers.
//! Anything left over is treated as a static buffer by [`classify`];
//! [`classify_strict`] rejects those patterns instead.

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

use ctr_kernel::BufferPermissions;

/// Low-nibble mask shared by all buffer tags.
const BUFFER_TAG_MASK: u32 = 0xF;
/// Handle-family selector mask (valid when the low nibble is zero).
const HANDLE_KIND_MASK: u32 = 0x30;

const TAG_STATIC_BUFFER: u32 = 0x02;
const TAG_PXI_BUFFER: u32 = 0x04;
const TAG_MAPPED_BUFFER: u32 = 0x08;

const KIND_COPY_HANDLE: u32 = 0x00;
const KIND_MOVE_HANDLE: u32 = 0x10;
const KIND_CALLING_PID: u32 = 0x20;

/// Largest number of handles one handle descriptor can carry.
pub const MAX_HANDLES_PER_DESC: u32 = 64;
/// Largest static buffer size (18 bits).
pub const MAX_STATIC_BUFFER_SIZE: u32 = (1 << 18) - 1;
/// Largest PXI buffer size (24 bits).
pub const MAX_PXI_BUFFER_SIZE: u32 = (1 << 24) - 1;
/// Largest mapped buffer size (28 bits).
pub const MAX_MAPPED_BUFFER_SIZE: u32 = (1 << 28) - 1;
/// Largest static/PXI buffer id.
pub const MAX_BUFFER_ID: u8 = 0xF;

/// Descriptor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Handles duplicated into the receiver; the sender keeps its own.
    CopyHandle,
    /// Handles transferred to the receiver; the sender loses them.
    MoveHandle,
    /// Placeholder the kernel fills with the sender's process id.
    CallingPid,
    /// Buffer copied into one of the receiver's static buffers.
    StaticBuffer,
    /// Buffer passed to the ARM9 over PXI.
    PxiBuffer,
    /// Buffer mapped into the receiver's address space.
    MappedBuffer,
}

/// Returns `true` if `word` belongs to the handle family.
#[inline]
pub const fn is_handle_descriptor(word: u32) -> bool {
    word & BUFFER_TAG_MASK == 0
}

/// Classifies a descriptor word.
///
/// Patterns that match no family fall back to [`DescriptorKind::StaticBuffer`].
pub const fn classify(word: u32) -> DescriptorKind {
    match classify_strict(word) {
        Ok(kind) => kind,
        Err(_) => DescriptorKind::StaticBuffer,
    }
}

/// Classifies a descriptor word, rejecting patterns that match no family.
pub const fn classify_strict(word: u32) -> Result<DescriptorKind, UnknownDescriptor> {
    // Note: Those checks must be done in this order
    if is_handle_descriptor(word) {
        return match word & HANDLE_KIND_MASK {
            KIND_COPY_HANDLE => Ok(DescriptorKind::CopyHandle),
            KIND_MOVE_HANDLE => Ok(DescriptorKind::MoveHandle),
            KIND_CALLING_PID => Ok(DescriptorKind::CallingPid),
            _ => Err(UnknownDescriptor(word)),
        };
    }

    if word & TAG_MAPPED_BUFFER != 0 {
        Ok(DescriptorKind::MappedBuffer)
    } else if word & TAG_PXI_BUFFER != 0 {
        Ok(DescriptorKind::PxiBuffer)
    } else if word & TAG_STATIC_BUFFER != 0 {
        Ok(DescriptorKind::StaticBuffer)
    } else {
        Err(UnknownDescriptor(word))
    }
}

/// A descriptor word matching no family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown descriptor {0:#010x}")]
pub struct UnknownDescriptor(pub u32);

/// Handle descriptor word (copy, move and calling-pid).
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleDesc {
    #[skip]
    __tag: B4,
    /// Family selector: 0 copy, 1 move, 2 calling pid.
    pub kind: B2,
    #[skip]
    __reserved: B20,
    /// Number of handles that follow, minus one.
    pub count_minus_one: B6,
}

const_assert_eq!(size_of::<HandleDesc>(), size_of::<u32>());

impl HandleDesc {
    /// Parses a handle descriptor word.
    #[inline]
    pub fn parse(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// Returns the descriptor word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// Number of handle words following the descriptor.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count_minus_one() as u32 + 1
    }
}

fn handle_desc(kind: u32, count: u32) -> Result<u32, DescriptorError> {
    if count == 0 || count > MAX_HANDLES_PER_DESC {
        return Err(DescriptorError::HandleCount(count));
    }

    let desc = HandleDesc::new()
        .with_kind((kind >> 4) as u8)
        .with_count_minus_one((count - 1) as u8);
    Ok(desc.to_raw())
}

/// Creates a copy-handle descriptor for `count` handles (1 to 64).
pub fn copy_handle_desc(count: u32) -> Result<u32, DescriptorError> {
    handle_desc(KIND_COPY_HANDLE, count)
}

/// Creates a move-handle descriptor for `count` handles (1 to 64).
pub fn move_handle_desc(count: u32) -> Result<u32, DescriptorError> {
    handle_desc(KIND_MOVE_HANDLE, count)
}

/// Creates a calling-pid descriptor.
#[inline]
pub const fn calling_pid_desc() -> u32 {
    KIND_CALLING_PID
}

/// Returns the number of handles described by a handle descriptor.
#[inline]
pub fn handle_count(word: u32) -> u32 {
    HandleDesc::parse(word).count()
}

/// Static buffer descriptor word. Followed by the buffer address.
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticBufferDesc {
    tag: B4,
    #[skip]
    __reserved: B6,
    /// Index of the receiver's static buffer.
    pub buffer_id: B4,
    /// Size in bytes.
    pub size: B18,
}

const_assert_eq!(size_of::<StaticBufferDesc>(), size_of::<u32>());

impl StaticBufferDesc {
    /// Parses a static buffer descriptor word.
    #[inline]
    pub fn parse(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// Returns the descriptor word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }
}

/// Creates a static buffer descriptor.
pub fn static_buffer_desc(size: u32, buffer_id: u8) -> Result<u32, DescriptorError> {
    if size > MAX_STATIC_BUFFER_SIZE {
        return Err(DescriptorError::BufferSize {
            size,
            max: MAX_STATIC_BUFFER_SIZE,
        });
    }
    if buffer_id > MAX_BUFFER_ID {
        return Err(DescriptorError::BufferId(buffer_id));
    }

    let desc = StaticBufferDesc::new()
        .with_tag(TAG_STATIC_BUFFER as u8)
        .with_buffer_id(buffer_id)
        .with_size(size);
    Ok(desc.to_raw())
}

/// PXI buffer descriptor word.
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PxiBufferDesc {
    #[skip]
    __unused: B1,
    /// The buffer is read-only; otherwise it is read-write.
    pub read_only: bool,
    tag: B2,
    /// PXI buffer id.
    pub buffer_id: B4,
    /// Size in bytes.
    pub size: B24,
}

const_assert_eq!(size_of::<PxiBufferDesc>(), size_of::<u32>());

impl PxiBufferDesc {
    /// Parses a PXI buffer descriptor word.
    #[inline]
    pub fn parse(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// Returns the descriptor word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }
}

/// Creates a PXI buffer descriptor.
pub fn pxi_buffer_desc(size: u32, buffer_id: u8, read_only: bool) -> Result<u32, DescriptorError> {
    if size > MAX_PXI_BUFFER_SIZE {
        return Err(DescriptorError::BufferSize {
            size,
            max: MAX_PXI_BUFFER_SIZE,
        });
    }
    if buffer_id > MAX_BUFFER_ID {
        return Err(DescriptorError::BufferId(buffer_id));
    }

    let desc = PxiBufferDesc::new()
        .with_read_only(read_only)
        .with_tag((TAG_PXI_BUFFER >> 2) as u8)
        .with_buffer_id(buffer_id)
        .with_size(size);
    Ok(desc.to_raw())
}

/// Mapped buffer descriptor word. Followed by the buffer address.
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappedBufferDesc {
    #[skip]
    __unused: B1,
    /// Raw permission bits (see [`BufferPermissions`]).
    pub perms: B2,
    tag: bool,
    /// Size in bytes.
    pub size: B28,
}

const_assert_eq!(size_of::<MappedBufferDesc>(), size_of::<u32>());

impl MappedBufferDesc {
    /// Parses a mapped buffer descriptor word.
    #[inline]
    pub fn parse(word: u32) -> Self {
        Self::from_bytes(word.to_le_bytes())
    }

    /// Returns the descriptor word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// Returns the requested permissions. Empty for a malformed descriptor.
    #[inline]
    pub fn permissions(&self) -> BufferPermissions {
        BufferPermissions::from_bits_truncate(self.perms() as u32)
    }
}

/// Creates a mapped buffer descriptor.
pub fn mapped_buffer_desc(size: u32, perms: BufferPermissions) -> Result<u32, DescriptorError> {
    if size > MAX_MAPPED_BUFFER_SIZE {
        return Err(DescriptorError::BufferSize {
            size,
            max: MAX_MAPPED_BUFFER_SIZE,
        });
    }
    if perms.is_empty() {
        return Err(DescriptorError::NoPermissions);
    }

    let desc = MappedBufferDesc::new()
        .with_perms(perms.bits() as u8)
        .with_tag(true)
        .with_size(size);
    Ok(desc.to_raw())
}

/// Error returned by the descriptor constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Handle count outside 1 to 64.
    #[error("handle count {0} outside 1..=64")]
    HandleCount(u32),
    /// Buffer size does not fit the descriptor's size field.
    #[error("buffer size {size:#x} exceeds {max:#x}")]
    BufferSize {
        /// Requested size.
        size: u32,
        /// Largest encodable size.
        max: u32,
    },
    /// Buffer id above 15.
    #[error("buffer id {0} exceeds 15")]
    BufferId(u8),
    /// A mapped buffer needs read and/or write permission.
    #[error("mapped buffer without permissions")]
    NoPermissions,
}

/// A decoded descriptor word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// `count` handles to duplicate.
    CopyHandles {
        /// Number of handle words that follow.
        count: u32,
    },
    /// `count` handles to transfer.
    MoveHandles {
        /// Number of handle words that follow.
        count: u32,
    },
    /// Calling process id request.
    CallingPid,
    /// Static buffer; an address word follows.
    StaticBuffer(StaticBufferDesc),
    /// PXI buffer.
    PxiBuffer(PxiBufferDesc),
    /// Mapped buffer; an address word follows.
    MappedBuffer(MappedBufferDesc),
}

impl Descriptor {
    /// Decodes a descriptor word, with the static buffer fallback of [`classify`].
    pub fn parse(word: u32) -> Self {
        Self::from_kind(classify(word), word)
    }

    /// Decodes a descriptor word, rejecting unknown patterns.
    pub fn parse_strict(word: u32) -> Result<Self, UnknownDescriptor> {
        classify_strict(word).map(|kind| Self::from_kind(kind, word))
    }

    fn from_kind(kind: DescriptorKind, word: u32) -> Self {
        match kind {
            DescriptorKind::CopyHandle => Self::CopyHandles {
                count: handle_count(word),
            },
            DescriptorKind::MoveHandle => Self::MoveHandles {
                count: handle_count(word),
            },
            DescriptorKind::CallingPid => Self::CallingPid,
            DescriptorKind::StaticBuffer => Self::StaticBuffer(StaticBufferDesc::parse(word)),
            DescriptorKind::PxiBuffer => Self::PxiBuffer(PxiBufferDesc::parse(word)),
            DescriptorKind::MappedBuffer => Self::MappedBuffer(MappedBufferDesc::parse(word)),
        }
    }

    /// Returns the descriptor family.
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::CopyHandles { .. } => DescriptorKind::CopyHandle,
            Self::MoveHandles { .. } => DescriptorKind::MoveHandle,
            Self::CallingPid => DescriptorKind::CallingPid,
            Self::StaticBuffer(_) => DescriptorKind::StaticBuffer,
            Self::PxiBuffer(_) => DescriptorKind::PxiBuffer,
            Self::MappedBuffer(_) => DescriptorKind::MappedBuffer,
        }
    }

    /// Number of words the descriptor occupies, itself included.
    pub fn word_count(&self) -> usize {
        match self {
            Self::CopyHandles { count } | Self::MoveHandles { count } => 1 + *count as usize,
            Self::CallingPid | Self::PxiBuffer(_) => 1,
            Self::StaticBuffer(_) | Self::MappedBuffer(_) => 2,
        }
    }
}

//! Descriptor translation.
//!
//! Request translation resolves every handle and buffer the client described
//! into server-side resources. Reply translation goes the other way: objects
//! the service hands back are installed in the client's handle table.
//!
//! Move handles are only invalidated once the whole request translated
//! successfully, so a request rejected halfway leaves the client's table as it
//! was. A handle named by a move descriptor may appear nowhere else in the
//! same request.

use std::collections::HashSet;

use ctr_ipc::{CommandBuffer, Descriptor, MalformedBuffer};
use ctr_kernel::{
    BufferPermissions, Handle, INVALID_HANDLE, Kernel, MappedView, ObjectRef, ProcessId,
};

use crate::{
    config::{DescriptorPolicy, TranslateConfig},
    error::IpcError,
};

/// Handles received with a request.
#[derive(Debug, Default)]
pub struct TranslatedHandles {
    /// Objects shared with the client, in request order.
    pub copied: Vec<ObjectRef>,
    moved: Vec<Option<ObjectRef>>,
}

impl TranslatedHandles {
    /// Number of moved objects received, taken or not.
    pub fn moved_len(&self) -> usize {
        self.moved.len()
    }

    /// Takes ownership of the moved object at `index`.
    ///
    /// Returns `None` if there is no such object or it was already taken.
    pub fn take_moved(&mut self, index: usize) -> Option<ObjectRef> {
        self.moved.get_mut(index).and_then(Option::take)
    }
}

/// A static buffer received with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticBuffer {
    /// Receiver buffer slot.
    pub buffer_id: u8,
    /// Read-only view of the client data.
    pub view: MappedView,
}

/// A PXI buffer received with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PxiBuffer {
    /// PXI buffer id.
    pub buffer_id: u8,
    /// Size in bytes.
    pub size: u32,
    /// Whether the ARM9 side may only read the buffer.
    pub read_only: bool,
}

/// Resources received with a request, in descriptor order per family.
#[derive(Debug, Default)]
pub struct TranslatedRequest {
    /// Copied and moved handles.
    pub handles: TranslatedHandles,
    /// Static buffers.
    pub static_buffers: Vec<StaticBuffer>,
    /// PXI buffers.
    pub pxi_buffers: Vec<PxiBuffer>,
    /// Mapped buffers.
    pub mapped_buffers: Vec<MappedView>,
    /// Process id, if a calling-pid descriptor was present.
    pub calling_pid: Option<ProcessId>,
}

/// Translation in progress; moves are recorded but not committed.
#[derive(Default)]
struct Translation {
    request: TranslatedRequest,
    moves: Vec<(Handle, ObjectRef)>,
    moved: HashSet<Handle>,
    copied: HashSet<Handle>,
}

impl Translation {
    fn copy_handle(&mut self, kernel: &dyn Kernel, handle: Handle) -> Result<(), IpcError> {
        if self.moved.contains(&handle) {
            return Err(IpcError::InvalidHandle(handle));
        }
        let object = kernel.resolve_handle(handle)?;
        self.copied.insert(handle);
        self.request.handles.copied.push(object);
        Ok(())
    }

    fn move_handle(&mut self, kernel: &dyn Kernel, handle: Handle) -> Result<(), IpcError> {
        if self.moved.contains(&handle) || self.copied.contains(&handle) {
            return Err(IpcError::InvalidHandle(handle));
        }
        let object = kernel.resolve_handle(handle)?;
        self.moved.insert(handle);
        self.moves.push((handle, object));
        Ok(())
    }

    fn commit(mut self, kernel: &dyn Kernel) -> TranslatedRequest {
        for (handle, object) in self.moves {
            kernel.invalidate_handle(handle);
            self.request.handles.moved.push(Some(object));
        }
        self.request
    }
}

/// Translates the descriptors of `source`, rewriting `scratch` in place.
///
/// `scratch` must hold a copy of `source`. Moved handle slots are cleared to
/// [`INVALID_HANDLE`] in `scratch`; every other word is kept.
pub(crate) fn translate_request(
    kernel: &dyn Kernel,
    config: &TranslateConfig,
    source: &CommandBuffer,
    scratch: &mut CommandBuffer,
) -> Result<TranslatedRequest, IpcError> {
    let mut cursor = source.translate_cursor()?;
    let mut translation = Translation::default();

    while !cursor.is_empty() {
        let start = cursor.position();
        let descriptor = match config.descriptor_policy {
            DescriptorPolicy::Permissive => cursor.next_descriptor()?,
            DescriptorPolicy::Strict => cursor.next_descriptor_strict()?,
        };
        cursor.check_fits(start, &descriptor)?;

        match descriptor {
            Descriptor::CopyHandles { count } => {
                for _ in 0..count {
                    let handle = Handle::from_raw(cursor.next_word()?);
                    translation.copy_handle(kernel, handle)?;
                }
            }
            Descriptor::MoveHandles { count } => {
                for _ in 0..count {
                    let slot = cursor.position();
                    let handle = Handle::from_raw(cursor.next_word()?);
                    translation.move_handle(kernel, handle)?;
                    scratch.write_word(slot, INVALID_HANDLE)?;
                }
            }
            Descriptor::CallingPid => {
                translation.request.calling_pid = Some(kernel.current_process_id());
            }
            Descriptor::StaticBuffer(desc) => {
                let address = cursor.next_word()?;
                let view = if desc.size() == 0 {
                    MappedView {
                        address,
                        size: 0,
                        perms: BufferPermissions::READ,
                    }
                } else {
                    kernel
                        .map_buffer(address, desc.size(), BufferPermissions::READ)
                        .map_err(IpcError::BufferMapFault)?
                };
                translation.request.static_buffers.push(StaticBuffer {
                    buffer_id: desc.buffer_id(),
                    view,
                });
            }
            Descriptor::PxiBuffer(desc) => {
                translation.request.pxi_buffers.push(PxiBuffer {
                    buffer_id: desc.buffer_id(),
                    size: desc.size(),
                    read_only: desc.read_only(),
                });
            }
            Descriptor::MappedBuffer(desc) => {
                let perms = desc.permissions();
                if perms.is_empty() {
                    return Err(MalformedBuffer::NoPermissions(desc.to_raw()).into());
                }
                let address = cursor.next_word()?;
                let view = kernel
                    .map_buffer(address, desc.size(), perms)
                    .map_err(IpcError::BufferMapFault)?;
                translation.request.mapped_buffers.push(view);
            }
        }
    }

    Ok(translation.commit(kernel))
}

/// Installs reply objects in the client's handle table.
///
/// Each handle slot of the reply's handle descriptors receives the next object
/// of `objects`. If the kernel runs out of handles, the handles created so far
/// are closed again.
pub(crate) fn translate_reply(
    kernel: &dyn Kernel,
    reply: &mut CommandBuffer,
    objects: Vec<ObjectRef>,
) -> Result<(), IpcError> {
    let mut slots = Vec::with_capacity(objects.len());

    let mut cursor = reply.translate_cursor()?;
    while !cursor.is_empty() {
        let start = cursor.position();
        let descriptor = cursor.next_descriptor()?;
        cursor.check_fits(start, &descriptor)?;

        match descriptor {
            Descriptor::CopyHandles { count } | Descriptor::MoveHandles { count } => {
                for _ in 0..count {
                    slots.push(cursor.position());
                    cursor.next_word()?;
                }
            }
            Descriptor::StaticBuffer(_) | Descriptor::MappedBuffer(_) => {
                cursor.next_word()?;
            }
            Descriptor::CallingPid | Descriptor::PxiBuffer(_) => {}
        }
    }

    let mut created = Vec::with_capacity(slots.len());
    for (slot, object) in slots.into_iter().zip(objects) {
        let handle = match kernel.create_handle(object) {
            Ok(handle) => handle,
            Err(err) => {
                for handle in created {
                    kernel.invalidate_handle(handle);
                }
                return Err(IpcError::Kernel(err));
            }
        };
        created.push(handle);
        reply.write_word(slot, handle.to_raw())?;
    }

    Ok(())
}

//! # ctr-kernel
//!
//! The kernel-side contracts consumed by the CTR IPC marshaling layer.
//!
//! The IPC core never owns kernel objects, handle tables or guest memory. It
//! only needs a small capability surface from the kernel emulation:
//!
//! - resolve a client handle into a live kernel object ([`Kernel::resolve_handle`]),
//! - invalidate a client handle whose object was moved ([`Kernel::invalidate_handle`]),
//! - install an object into the client's handle table ([`Kernel::create_handle`]),
//! - identify the requesting process ([`Kernel::current_process_id`]),
//! - map a client buffer into the server ([`Kernel::map_buffer`]).
//!
//! Raw command-buffer words are read and written through [`ControlMemory`].
//!
//! ## Host backend
//!
//! With the `host` feature (enabled by default) the [`host`] module provides an
//! in-memory handle table and control memory, suitable for tests and for
//! embedders without a full kernel object model.

pub mod handle;
pub mod mem;
pub mod object;
pub mod result;

#[cfg(feature = "host")]
pub mod host;

pub use self::{
    handle::{Handle, INVALID_HANDLE, ProcessId},
    mem::{BufferPermissions, ControlMemory, MappedView, VAddr},
    object::{KernelObject, ObjectRef},
    result::{ResultCode, ToRawResultCode},
};

use self::result::{ErrorDescription, ErrorLevel, ErrorModule, ErrorSummary};

/// Kernel capabilities required by the IPC core.
///
/// All methods act on the *requesting* (client) process: handles are resolved
/// in, invalidated in and created in the client's handle table. Implementations
/// are responsible for synchronizing their own object tables.
pub trait Kernel: Send + Sync {
    /// Resolves a handle in the client's table into a live kernel object.
    fn resolve_handle(&self, handle: Handle) -> Result<ObjectRef, KernelError>;

    /// Removes a handle from the client's table.
    ///
    /// Called after a move-handle translation; invalidating an unknown handle
    /// is a no-op.
    fn invalidate_handle(&self, handle: Handle);

    /// Installs `object` into the client's handle table.
    fn create_handle(&self, object: ObjectRef) -> Result<Handle, KernelError>;

    /// Returns the process id of the requesting execution context.
    fn current_process_id(&self) -> ProcessId;

    /// Maps `size` bytes of client memory at `address` with `perms`.
    fn map_buffer(
        &self,
        address: VAddr,
        size: u32,
        perms: BufferPermissions,
    ) -> Result<MappedView, KernelError>;
}

/// Error returned by [`Kernel`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The handle is closed or was never issued.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    /// The client's handle table is full.
    #[error("out of handles")]
    OutOfHandles,
    /// The address range is not backed by client memory.
    #[error("invalid address range {address:#010x}+{size:#x}")]
    InvalidAddress {
        /// Start of the requested range.
        address: VAddr,
        /// Length of the requested range in bytes.
        size: u32,
    },
    /// The address range does not grant the requested permissions.
    #[error("wrong permission {requested:?} for {address:#010x}+{size:#x}")]
    WrongPermission {
        /// Start of the requested range.
        address: VAddr,
        /// Length of the requested range in bytes.
        size: u32,
        /// Permissions asked for.
        requested: BufferPermissions,
    },
}

impl ToRawResultCode for KernelError {
    fn to_rc(self) -> ResultCode {
        match self {
            Self::InvalidHandle(_) => ResultCode::from_parts(
                ErrorDescription::InvalidHandle,
                ErrorModule::Kernel,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Permanent,
            ),
            Self::OutOfHandles => ResultCode::from_parts(
                ErrorDescription::OutOfMemory,
                ErrorModule::Kernel,
                ErrorSummary::OutOfResource,
                ErrorLevel::Permanent,
            ),
            Self::InvalidAddress { .. } => ResultCode::from_parts(
                ErrorDescription::InvalidAddress,
                ErrorModule::Kernel,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Usage,
            ),
            Self::WrongPermission { .. } => ResultCode::from_parts(
                ErrorDescription::WrongPermission,
                ErrorModule::Kernel,
                ErrorSummary::WrongArgument,
                ErrorLevel::Permanent,
            ),
        }
    }
}

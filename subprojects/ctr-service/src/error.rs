//! Request-time error kinds and their guest result codes.

use ctr_ipc::{MalformedBuffer, OutOfBounds, PortName, desc::DescriptorError, header::HeaderError};
use ctr_kernel::{
    Handle, KernelError, ResultCode, ToRawResultCode,
    result::{ErrorDescription, ErrorLevel, ErrorModule, ErrorSummary},
};

/// Error raised while handling a request.
///
/// Every variant maps onto a CTR result code through [`ToRawResultCode`]; the
/// request handler turns it into an error reply instead of propagating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// The header or a descriptor is inconsistent with the buffer.
    #[error("malformed command buffer")]
    MalformedBuffer(#[from] MalformedBuffer),
    /// A handle in the request could not be resolved.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    /// The command id has no implementation.
    #[error("unimplemented function {command_id:#06x}")]
    UnimplementedFunction {
        /// Requested command id.
        command_id: u16,
    },
    /// A port or service name is already taken.
    #[error("name {0} already registered")]
    NameAlreadyRegistered(PortName),
    /// A parameter access past the declared message.
    #[error(transparent)]
    OutOfBounds(#[from] OutOfBounds),
    /// A client buffer could not be mapped.
    #[error("failed to map client buffer")]
    BufferMapFault(#[source] KernelError),
    /// No port or service with that name.
    #[error("port {0} not found")]
    NotFound(PortName),
    /// The port's session limit is reached.
    #[error("port {0} has no free sessions")]
    MaxConnectionsReached(PortName),
    /// A reply does not fit a command header.
    #[error("reply does not fit a command header")]
    ReplyOverflow(#[from] HeaderError),
    /// A reply descriptor could not be encoded.
    #[error("invalid reply descriptor")]
    ReplyDescriptor(#[from] DescriptorError),
    /// Any other kernel failure (e.g. a full client handle table).
    #[error("kernel operation failed")]
    Kernel(#[source] KernelError),
    /// A service-specific failure carrying its own result code.
    #[error("service error {0}")]
    Service(ResultCode),
}

impl ToRawResultCode for IpcError {
    fn to_rc(self) -> ResultCode {
        match self {
            Self::MalformedBuffer(_) | Self::ReplyOverflow(_) | Self::ReplyDescriptor(_) => {
                ResultCode::from_parts(
                    ErrorDescription::InvalidBufferDescriptor,
                    ErrorModule::Os,
                    ErrorSummary::WrongArgument,
                    ErrorLevel::Permanent,
                )
            }
            Self::OutOfBounds(_) => ResultCode::from_parts(
                ErrorDescription::OutOfRange,
                ErrorModule::Os,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Usage,
            ),
            Self::InvalidHandle(_) => ResultCode::from_parts(
                ErrorDescription::InvalidHandle,
                ErrorModule::Kernel,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Permanent,
            ),
            Self::BufferMapFault(_) => ResultCode::from_parts(
                ErrorDescription::InvalidAddress,
                ErrorModule::Kernel,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Usage,
            ),
            Self::UnimplementedFunction { .. } => ResultCode::from_parts(
                ErrorDescription::NotImplemented,
                ErrorModule::Common,
                ErrorSummary::NotSupported,
                ErrorLevel::Permanent,
            ),
            Self::NameAlreadyRegistered(_) => ResultCode::from_parts(
                ErrorDescription::AlreadyExists,
                ErrorModule::Srv,
                ErrorSummary::WrongArgument,
                ErrorLevel::Permanent,
            ),
            Self::NotFound(_) => ResultCode::from_parts(
                ErrorDescription::NotFound,
                ErrorModule::Srv,
                ErrorSummary::NotFound,
                ErrorLevel::Permanent,
            ),
            Self::MaxConnectionsReached(_) => ResultCode::from_parts(
                ErrorDescription::MaxConnectionsReached,
                ErrorModule::Os,
                ErrorSummary::WouldBlock,
                ErrorLevel::Temporary,
            ),
            Self::Kernel(err) => err.to_rc(),
            Self::Service(rc) => rc,
        }
    }
}

impl From<KernelError> for IpcError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::InvalidHandle(handle) => Self::InvalidHandle(handle),
            err => Self::Kernel(err),
        }
    }
}

impl From<ResultCode> for IpcError {
    fn from(rc: ResultCode) -> Self {
        Self::Service(rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_connections_matches_guest_code() {
        let name = PortName::new("fs:USER").unwrap();
        assert_eq!(IpcError::MaxConnectionsReached(name).to_rc().to_raw(), 0xD040_1834);
    }

    #[test]
    fn unimplemented_function_is_common_not_implemented() {
        let rc = IpcError::UnimplementedFunction { command_id: 9 }.to_rc();

        assert_eq!(rc.description(), ErrorDescription::NotImplemented as u16);
        assert_eq!(rc.module(), ErrorModule::Common as u8);
        assert_eq!(rc.summary(), ErrorSummary::NotSupported as u8);
        assert_eq!(rc.level(), ErrorLevel::Permanent as u8);
    }

    #[test]
    fn kernel_invalid_handle_maps_to_invalid_handle() {
        let handle = Handle::from_raw(0x8001);
        assert_eq!(
            IpcError::from(KernelError::InvalidHandle(handle)),
            IpcError::InvalidHandle(handle)
        );
        assert_eq!(
            IpcError::from(KernelError::OutOfHandles),
            IpcError::Kernel(KernelError::OutOfHandles)
        );
    }

    #[test]
    fn service_codes_pass_through() {
        let rc = ResultCode::from_raw(0xD8E0_07F7);
        assert_eq!(IpcError::Service(rc).to_rc(), rc);
    }
}

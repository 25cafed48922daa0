//! `srv:` Service Broker.
//!
//! Applications never connect to HLE services directly: they connect to the
//! `srv:` named port and ask it for a session to a service by name. This
//! crate implements that broker on top of a [`ServiceManager`]:
//!
//! - `RegisterClient` (0x0001) records the client's process id.
//! - `GetServiceHandle` (0x0005) opens a session to a service of the
//!   [`Namespace::Srv`] namespace and moves it to the client.
//!
//! `EnableNotification` and `RegisterService` are known but not implemented.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use ctr_ipc::{PortName, PortNameError};
use ctr_kernel::{
    ObjectRef, ProcessId, ResultCode, ToRawResultCode,
    result::{ErrorDescription, ErrorLevel, ErrorModule, ErrorSummary},
};
use ctr_service::{
    FunctionInfo, Interface, IpcError, Namespace, RegisterError, RequestContext, Service,
    ServiceManager,
};

mod proto;

pub use self::proto::SRV_PORT_NAME;

/// srv-specific "invalid name size" description.
const DESCRIPTION_INVALID_NAME_SIZE: u16 = 5;

/// The `srv:` broker service.
#[derive(Debug)]
pub struct SrvService {
    manager: Weak<ServiceManager>,
    clients: Mutex<Vec<ProcessId>>,
}

impl SrvService {
    const FUNCTIONS: &[FunctionInfo<Self>] = &[
        FunctionInfo::new(
            proto::REGISTER_CLIENT,
            Some(Self::register_client),
            "RegisterClient",
        ),
        FunctionInfo::new(proto::ENABLE_NOTIFICATION, None, "EnableNotification"),
        FunctionInfo::new(proto::REGISTER_SERVICE, None, "RegisterService"),
        FunctionInfo::new(
            proto::GET_SERVICE_HANDLE,
            Some(Self::get_service_handle),
            "GetServiceHandle",
        ),
    ];

    /// Creates a broker serving the services of `manager`.
    ///
    /// Only a weak reference is kept, as the broker is itself registered in
    /// `manager`.
    pub fn new(manager: &Arc<ServiceManager>) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Process ids of the registered clients, in registration order.
    pub fn clients(&self) -> Vec<ProcessId> {
        self.clients.lock().clone()
    }

    /// `RegisterClient`: `(0x0001, 0, 1)` with a calling-pid descriptor.
    fn register_client(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
        let pid = ctx.calling_pid().ok_or(SrvError::MissingProcessId)?;

        let mut clients = self.clients.lock();
        if !clients.contains(&pid) {
            clients.push(pid);
        }
        drop(clients);

        log::debug!("srv: registered client {pid}");
        ctx.reply().finish()
    }

    /// `GetServiceHandle`: `(0x0005, 4, 0)` with the name in words 1-2, its
    /// length in word 3 and flags in word 4.
    fn get_service_handle(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
        let words = [ctx.param(0)?, ctx.param(1)?];
        let len = ctx.param(2)?;
        let flags = ctx.param(3)?;

        if len > proto::MAX_NAME_LEN {
            return Err(SrvError::InvalidNameSize(len).into());
        }
        let name = PortName::from_words(words, len).map_err(SrvError::InvalidName)?;

        let manager = self.manager.upgrade().ok_or(IpcError::NotFound(name))?;
        let session = manager.get_service_handle(name.as_str())?;
        log::debug!("srv: GetServiceHandle({name}) flags={flags:#x}");

        let mut rb = ctx.reply();
        rb.push_move_objects([Arc::new(session) as ObjectRef])?;
        rb.finish()
    }
}

impl Service for SrvService {
    fn port_name(&self) -> &'static str {
        SRV_PORT_NAME
    }

    fn functions(&self) -> &'static [FunctionInfo<Self>] {
        Self::FUNCTIONS
    }
}

/// Registers the `srv:` broker as a kernel named port of `manager`.
pub fn install(manager: &Arc<ServiceManager>) -> Result<Arc<Interface<SrvService>>, InstallError> {
    let interface = Interface::new(SrvService::new(manager)).map_err(InstallError::Interface)?;
    let interface = Arc::new(interface);
    manager
        .add_service(Namespace::Kernel, interface.clone())
        .map_err(InstallError::Register)?;
    Ok(interface)
}

/// Error returned by [`install`].
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The dispatch table is invalid.
    #[error("invalid srv: dispatch table")]
    Interface(#[source] ctr_service::InterfaceError),
    /// `srv:` is already registered.
    #[error("failed to register srv:")]
    Register(#[source] RegisterError),
}

/// `srv:` specific failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SrvError {
    /// The requested name is longer than 8 characters.
    #[error("service name length {0} exceeds 8")]
    InvalidNameSize(u32),
    /// The requested name is not ASCII or contains NUL.
    #[error("invalid service name")]
    InvalidName(#[source] PortNameError),
    /// `RegisterClient` without a calling-pid descriptor.
    #[error("client did not send its process id")]
    MissingProcessId,
}

impl ToRawResultCode for SrvError {
    fn to_rc(self) -> ResultCode {
        match self {
            Self::InvalidNameSize(_) => ResultCode::new()
                .with_description(DESCRIPTION_INVALID_NAME_SIZE)
                .with_module(ErrorModule::Srv as u8)
                .with_summary(ErrorSummary::WrongArgument as u8)
                .with_level(ErrorLevel::Permanent as u8),
            Self::InvalidName(_) => ResultCode::from_parts(
                ErrorDescription::NotFound,
                ErrorModule::Srv,
                ErrorSummary::NotFound,
                ErrorLevel::Permanent,
            ),
            Self::MissingProcessId => ResultCode::from_parts(
                ErrorDescription::NotAuthorized,
                ErrorModule::Srv,
                ErrorSummary::WrongArgument,
                ErrorLevel::Permanent,
            ),
        }
    }
}

impl From<SrvError> for IpcError {
    fn from(err: SrvError) -> Self {
        Self::Service(err.to_rc())
    }
}

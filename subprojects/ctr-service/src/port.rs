//! Ports and sessions.
//!
//! A [`ServicePort`] is the connectable endpoint of one handler. Connecting
//! yields a [`Session`], which counts against the port's session limit until
//! it is dropped. Sessions are kernel objects, so they can be handed to
//! clients through move-handle replies.

use core::{
    any::Any,
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};
use std::sync::Arc;

use ctr_ipc::{COMMAND_BUFFER_WORDS, CommandBuffer, Header, PortName};
use ctr_kernel::{ControlMemory, Kernel, KernelObject, ResultCode};

use crate::{
    config::TranslateConfig,
    handler::{SessionRequestHandler, handle_sync_request},
};

/// Connectable endpoint of a session request handler.
pub struct ServicePort {
    name: PortName,
    max_sessions: u32,
    active_sessions: AtomicU32,
    config: TranslateConfig,
    handler: Arc<dyn SessionRequestHandler>,
}

impl ServicePort {
    /// Creates a port named and limited after `handler`.
    pub fn new(handler: Arc<dyn SessionRequestHandler>, config: TranslateConfig) -> Self {
        Self {
            name: handler.port_name(),
            max_sessions: handler.max_sessions(),
            active_sessions: AtomicU32::new(0),
            config,
            handler,
        }
    }

    /// Port name.
    #[inline]
    pub fn name(&self) -> PortName {
        self.name
    }

    /// Session limit.
    #[inline]
    pub fn max_sessions(&self) -> u32 {
        self.max_sessions
    }

    /// Number of open sessions.
    #[inline]
    pub fn active_sessions(&self) -> u32 {
        self.active_sessions.load(Ordering::Acquire)
    }

    /// The handler serving this port.
    #[inline]
    pub fn handler(&self) -> &Arc<dyn SessionRequestHandler> {
        &self.handler
    }

    /// Opens a session, unless the session limit is reached.
    pub fn connect(self: &Arc<Self>) -> Result<Session, MaxSessionsReached> {
        self.active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_sessions).then_some(count + 1)
            })
            .map_err(|_| MaxSessionsReached(self.name))?;

        log::debug!(
            "{}: session opened ({}/{})",
            self.name,
            self.active_sessions(),
            self.max_sessions
        );
        Ok(Session { port: self.clone() })
    }
}

impl fmt::Debug for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePort")
            .field("name", &self.name)
            .field("max_sessions", &self.max_sessions)
            .field("active_sessions", &self.active_sessions())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A port has no free sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("port {0} reached its session limit")]
pub struct MaxSessionsReached(pub PortName);

/// An open connection to a [`ServicePort`].
pub struct Session {
    port: Arc<ServicePort>,
}

impl Session {
    /// The port this session is connected to.
    #[inline]
    pub fn port(&self) -> &Arc<ServicePort> {
        &self.port
    }

    /// Handles the request in `buffer` and replaces it with the reply.
    pub fn handle_sync_request(&self, kernel: &dyn Kernel, buffer: &mut CommandBuffer) -> ResultCode {
        handle_sync_request(&*self.port.handler, kernel, &self.port.config, buffer)
    }

    /// Handles the request in a thread's control-buffer region.
    ///
    /// The message is loaded according to its header, handled, and the reply
    /// stored back into the same region. Words past the end of the region are
    /// never loaded, so a header declaring more words than the region holds is
    /// rejected as malformed.
    pub fn handle_sync_request_in<M>(&self, kernel: &dyn Kernel, memory: &mut M) -> ResultCode
    where
        M: ControlMemory + ?Sized,
    {
        let region = memory.len_words().min(COMMAND_BUFFER_WORDS);
        let len = match region {
            0 => 0,
            _ => Header::from_raw(memory.read_word(0)).total_words().min(region),
        };
        let mut buffer = CommandBuffer::load(&*memory, len).unwrap_or_default();

        let rc = self.handle_sync_request(kernel, &mut buffer);
        buffer.store(memory);
        rc
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.port.active_sessions.fetch_sub(1, Ordering::AcqRel);
        log::debug!("{}: session closed", self.port.name);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("port", &self.port.name).finish()
    }
}

impl KernelObject for Session {
    fn type_name(&self) -> &'static str {
        "ClientSession"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use ctr_ipc::{MalformedBuffer, header::make_header};
    use ctr_kernel::{
        ProcessId, ToRawResultCode,
        host::{HostKernel, HostMemory},
    };

    use super::*;
    use crate::{error::IpcError, handler::RequestContext};

    struct Counter;

    impl SessionRequestHandler for Counter {
        fn port_name(&self) -> PortName {
            PortName::new("cnt").unwrap()
        }

        fn max_sessions(&self) -> u32 {
            2
        }

        fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
            let value = ctx.param(0)?;
            let mut rb = ctx.reply();
            rb.push(value + 1);
            rb.finish()
        }
    }

    fn port() -> Arc<ServicePort> {
        Arc::new(ServicePort::new(Arc::new(Counter), TranslateConfig::default()))
    }

    #[test]
    fn session_limit_is_enforced_and_released_on_drop() {
        let port = port();

        let first = port.connect().unwrap();
        let _second = port.connect().unwrap();
        assert_eq!(port.active_sessions(), 2);
        assert_eq!(port.connect().unwrap_err(), MaxSessionsReached(port.name()));

        drop(first);
        assert_eq!(port.active_sessions(), 1);
        assert!(port.connect().is_ok());
    }

    #[test]
    fn session_handles_requests_in_control_memory() {
        let port = port();
        let session = port.connect().unwrap();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let mut memory = HostMemory::new(COMMAND_BUFFER_WORDS);
        memory.write_word(0, make_header(1, 1, 0).unwrap());
        memory.write_word(4, 41);

        let rc = session.handle_sync_request_in(&kernel, &mut memory);

        assert!(rc.is_success());
        assert_eq!(&memory.words()[..3], &[make_header(1, 2, 0).unwrap(), 0, 42]);
    }

    #[test]
    fn header_larger_than_control_memory_is_malformed() {
        let port = port();
        let session = port.connect().unwrap();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let mut memory = HostMemory::from_words(&[make_header(1, 5, 0).unwrap(), 41, 2]);

        let rc = session.handle_sync_request_in(&kernel, &mut memory);

        let expected = IpcError::MalformedBuffer(MalformedBuffer::TooShort {
            declared: 6,
            len: 3,
        })
        .to_rc();
        assert_eq!(rc, expected);
        assert_eq!(memory.words(), &[make_header(1, 1, 0).unwrap(), expected.to_raw(), 0]);
    }

    #[test]
    fn empty_control_memory_gets_error_reply() {
        let port = port();
        let session = port.connect().unwrap();
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        let mut memory = HostMemory::new(0);

        let rc = session.handle_sync_request_in(&kernel, &mut memory);

        assert_eq!(rc, IpcError::MalformedBuffer(MalformedBuffer::Empty).to_rc());
        assert!(memory.words().is_empty());
    }

    #[test]
    fn session_is_a_kernel_object() {
        let port = port();
        let object: ctr_kernel::ObjectRef = Arc::new(port.connect().unwrap());

        let session = object.downcast_ref::<Session>().unwrap();
        assert_eq!(session.port().name(), "cnt");
        assert_eq!(object.type_name(), "ClientSession");
    }
}

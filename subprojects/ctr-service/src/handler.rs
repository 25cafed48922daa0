//! Synchronous request handling.
//!
//! A request moves through a fixed set of states:
//!
//! ```text
//! Received ─► Translating ─► Dispatching ─► Replying ─► Done
//!     │             │                          ▲
//!     └─────────────┴──────── (failure) ───────┘
//! ```
//!
//! [`handle_sync_request`] always reaches `Done` and always leaves a reply in
//! the caller's buffer. Failures become error replies: a `(command_id, 1, 0)`
//! header followed by the result code, every other word zeroed.

use ctr_ipc::{CommandBuffer, Header, OutOfBounds, PortName};
use ctr_kernel::{Kernel, MappedView, ObjectRef, ProcessId, ResultCode, ToRawResultCode};

use crate::{
    DEFAULT_MAX_SESSIONS,
    config::TranslateConfig,
    error::IpcError,
    reply::ReplyBuilder,
    translate::{
        PxiBuffer, StaticBuffer, TranslatedRequest, translate_reply, translate_request,
    },
};

/// Server side of a session: receives translated requests and writes replies.
pub trait SessionRequestHandler: Send + Sync {
    /// Name of the port the handler is registered under.
    fn port_name(&self) -> PortName;

    /// Maximum number of simultaneously open sessions.
    fn max_sessions(&self) -> u32 {
        DEFAULT_MAX_SESSIONS
    }

    /// Handles one request.
    ///
    /// The reply is written through [`RequestContext::reply`]. Returning
    /// without replying sends an empty success reply; returning an error
    /// discards any reply and sends an error reply instead.
    fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), IpcError>;
}

/// Lifecycle of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// The command buffer was handed over.
    Received,
    /// Descriptors are being resolved.
    Translating,
    /// The service function is running.
    Dispatching,
    /// The reply is being translated and written back.
    Replying,
    /// The reply is in the caller's buffer.
    Done,
}

impl RequestState {
    /// Returns `true` if `self -> next` is a valid transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        use RequestState::*;

        matches!(
            (self, next),
            (Received, Translating)
                | (Translating, Dispatching)
                | (Received | Translating | Dispatching, Replying)
                | (Replying, Done)
        )
    }
}

struct SyncRequest {
    port: PortName,
    command_id: u16,
    state: RequestState,
}

impl SyncRequest {
    fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid request transition {:?} -> {next:?}",
            self.state
        );
        log::trace!(
            "{}: command {:#06x} {:?} -> {next:?}",
            self.port,
            self.command_id,
            self.state
        );
        self.state = next;
    }
}

/// Handles the request in `buffer` and replaces it with the reply.
///
/// Returns the reply's result code. Never fails: every error is reported to
/// the client through an error reply.
pub fn handle_sync_request<H>(
    handler: &H,
    kernel: &dyn Kernel,
    config: &TranslateConfig,
    buffer: &mut CommandBuffer,
) -> ResultCode
where
    H: SessionRequestHandler + ?Sized,
{
    let mut request = SyncRequest {
        port: handler.port_name(),
        command_id: buffer.read_header().map_or(0, |header| header.command_id()),
        state: RequestState::Received,
    };

    let reply = process(&mut request, handler, kernel, config, buffer).unwrap_or_else(|err| {
        match err {
            // Already logged by the dispatcher
            IpcError::UnimplementedFunction { .. } => {}
            err => log::warn!(
                "{}: command {:#06x} failed: {err}",
                request.port,
                request.command_id
            ),
        }
        error_reply(request.command_id, err.to_rc())
    });

    if request.state != RequestState::Replying {
        request.advance(RequestState::Replying);
    }
    buffer.overwrite(&reply);
    request.advance(RequestState::Done);

    reply_result(&reply)
}

fn process<H>(
    request: &mut SyncRequest,
    handler: &H,
    kernel: &dyn Kernel,
    config: &TranslateConfig,
    buffer: &CommandBuffer,
) -> Result<CommandBuffer, IpcError>
where
    H: SessionRequestHandler + ?Sized,
{
    let header = buffer.validate()?;
    let mut scratch = CommandBuffer::from_words(&buffer.as_words()[..header.total_words()])?;

    request.advance(RequestState::Translating);
    let translated = translate_request(kernel, config, buffer, &mut scratch)?;

    request.advance(RequestState::Dispatching);
    let mut ctx = RequestContext::new(header, scratch.normal_params()?.to_vec(), translated);
    handler.handle_request(&mut ctx)?;
    if ctx.reply.is_none() {
        ctx.reply().finish()?;
    }

    request.advance(RequestState::Replying);
    let (mut reply, objects) = ctx.reply.take().unwrap_or_default();
    translate_reply(kernel, &mut reply, objects)?;
    Ok(reply)
}

fn error_reply(command_id: u16, rc: ResultCode) -> CommandBuffer {
    let header = Header::new()
        .with_command_id(command_id)
        .with_normal_params(1);
    CommandBuffer::from_words(&[header.to_raw(), rc.to_raw()]).unwrap_or_default()
}

fn reply_result(reply: &CommandBuffer) -> ResultCode {
    match reply.read_header() {
        Ok(header) if header.normal_params() > 0 => {
            reply.read_word(1).map_or(ResultCode::success(), ResultCode::from_raw)
        }
        _ => ResultCode::success(),
    }
}

/// A translated request as seen by a service function.
pub struct RequestContext {
    header: Header,
    params: Vec<u32>,
    translated: TranslatedRequest,
    pub(crate) reply: Option<(CommandBuffer, Vec<ObjectRef>)>,
}

impl RequestContext {
    pub(crate) fn new(header: Header, params: Vec<u32>, translated: TranslatedRequest) -> Self {
        Self {
            header,
            params,
            translated,
            reply: None,
        }
    }

    /// Request header.
    #[inline]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Requested command id.
    #[inline]
    pub fn command_id(&self) -> u16 {
        self.header.command_id()
    }

    /// Normal parameter words.
    #[inline]
    pub fn params(&self) -> &[u32] {
        &self.params
    }

    /// Normal parameter word at `index`.
    pub fn param(&self, index: usize) -> Result<u32, IpcError> {
        self.params.get(index).copied().ok_or(IpcError::OutOfBounds(OutOfBounds {
            index,
            len: self.params.len(),
        }))
    }

    /// Two normal parameter words at `index`, low word first.
    pub fn param_u64(&self, index: usize) -> Result<u64, IpcError> {
        let low = self.param(index)? as u64;
        let high = self.param(index + 1)? as u64;
        Ok(high << 32 | low)
    }

    /// Objects received through copy-handle descriptors.
    #[inline]
    pub fn copied_objects(&self) -> &[ObjectRef] {
        &self.translated.handles.copied
    }

    /// Number of objects received through move-handle descriptors.
    #[inline]
    pub fn moved_object_count(&self) -> usize {
        self.translated.handles.moved_len()
    }

    /// Takes the object received through the `index`-th moved handle.
    ///
    /// Each moved object can be taken once; untaken objects are released when
    /// the request completes.
    pub fn take_moved_object(&mut self, index: usize) -> Option<ObjectRef> {
        self.translated.handles.take_moved(index)
    }

    /// Process id of the client, if the request carried a calling-pid descriptor.
    #[inline]
    pub fn calling_pid(&self) -> Option<ProcessId> {
        self.translated.calling_pid
    }

    /// Static buffers received with the request.
    #[inline]
    pub fn static_buffers(&self) -> &[StaticBuffer] {
        &self.translated.static_buffers
    }

    /// PXI buffers received with the request.
    #[inline]
    pub fn pxi_buffers(&self) -> &[PxiBuffer] {
        &self.translated.pxi_buffers
    }

    /// Mapped buffers received with the request.
    #[inline]
    pub fn mapped_buffers(&self) -> &[MappedView] {
        &self.translated.mapped_buffers
    }

    /// Starts the reply. The result code defaults to success.
    pub fn reply(&mut self) -> ReplyBuilder<'_> {
        ReplyBuilder::new(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        any::Any,
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
    };

    use ctr_ipc::{
        desc::{move_handle_desc, static_buffer_desc},
        header::make_header,
    };
    use ctr_kernel::{BufferPermissions, Handle, KernelObject, host::HostKernel};

    use super::*;

    #[derive(Debug)]
    struct Token(u32);

    impl KernelObject for Token {
        fn type_name(&self) -> &'static str {
            "Token"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Test handler:
    /// - 1: echoes its parameters
    /// - 2: replies with the id of the moved object
    /// - 3: replies with a moved `Token(0x55)`
    /// - 4: replies with the size and id of the first static buffer
    /// - 5: returns without replying
    #[derive(Default)]
    struct EchoHandler {
        dispatched: AtomicU32,
    }

    impl SessionRequestHandler for EchoHandler {
        fn port_name(&self) -> PortName {
            PortName::new("echo").unwrap()
        }

        fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            match ctx.command_id() {
                1 => {
                    let params = ctx.params().to_vec();
                    let mut rb = ctx.reply();
                    for word in params {
                        rb.push(word);
                    }
                    rb.finish()
                }
                2 => {
                    assert_eq!(ctx.moved_object_count(), 1);
                    let object = ctx.take_moved_object(0).ok_or(IpcError::InvalidHandle(
                        Handle::INVALID,
                    ))?;
                    let id = object.downcast_ref::<Token>().map_or(0, |token| token.0);
                    let mut rb = ctx.reply();
                    rb.push(id);
                    rb.finish()
                }
                3 => {
                    let mut rb = ctx.reply();
                    rb.push_move_objects([Arc::new(Token(0x55)) as ObjectRef])?;
                    rb.finish()
                }
                4 => {
                    let buffer = ctx.static_buffers()[0];
                    let mut rb = ctx.reply();
                    rb.push(buffer.view.size).push(buffer.buffer_id as u32);
                    rb.finish()
                }
                5 => Ok(()),
                command_id => Err(IpcError::UnimplementedFunction { command_id }),
            }
        }
    }

    fn run(handler: &EchoHandler, kernel: &HostKernel, words: &[u32]) -> (ResultCode, Vec<u32>) {
        let mut buffer = CommandBuffer::from_words(words).unwrap();
        let rc = handle_sync_request(handler, kernel, &TranslateConfig::default(), &mut buffer);
        (rc, buffer.as_words().to_vec())
    }

    #[test]
    fn echo_round_trip() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let request = [make_header(1, 2, 0).unwrap(), 0xAAAA_AAAA, 0xBBBB_BBBB];
        let (rc, reply) = run(&handler, &kernel, &request);

        assert!(rc.is_success());
        assert_eq!(
            reply,
            [make_header(1, 3, 0).unwrap(), 0, 0xAAAA_AAAA, 0xBBBB_BBBB]
        );
    }

    #[test]
    fn invalid_move_handle_is_not_dispatched() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let request = [make_header(2, 0, 2).unwrap(), move_handle_desc(1).unwrap(), 0x8123];
        let (rc, reply) = run(&handler, &kernel, &request);

        let expected = IpcError::InvalidHandle(Handle::from_raw(0x8123)).to_rc();
        assert_eq!(rc, expected);
        assert_eq!(reply, [make_header(2, 1, 0).unwrap(), expected.to_raw(), 0]);
        assert_eq!(handler.dispatched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn moved_object_reaches_service_and_leaves_client() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        let handle = kernel.create_handle(Arc::new(Token(42))).unwrap();

        let request = [make_header(2, 0, 2).unwrap(), move_handle_desc(1).unwrap(), handle.to_raw()];
        let (rc, reply) = run(&handler, &kernel, &request);

        assert!(rc.is_success());
        assert_eq!(reply[2], 42);
        assert!(!kernel.contains(handle));
    }

    #[test]
    fn reply_objects_become_client_handles() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let (rc, reply) = run(&handler, &kernel, &[make_header(3, 0, 0).unwrap()]);

        assert!(rc.is_success());
        assert_eq!(reply[0], make_header(3, 1, 2).unwrap());
        assert_eq!(reply[2], move_handle_desc(1).unwrap());
        let object = kernel.resolve_handle(Handle::from_raw(reply[3])).unwrap();
        assert_eq!(object.downcast_ref::<Token>().map(|token| token.0), Some(0x55));
    }

    #[test]
    fn static_buffer_reaches_service() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));
        kernel.add_region(0x0800_0000, 0x1000, BufferPermissions::READ);

        let request = [
            make_header(4, 0, 2).unwrap(),
            static_buffer_desc(0x100, 3).unwrap(),
            0x0800_0000,
        ];
        let (rc, reply) = run(&handler, &kernel, &request);

        assert!(rc.is_success());
        assert_eq!(reply, [make_header(4, 3, 0).unwrap(), 0, 0x100, 3]);
    }

    #[test]
    fn missing_reply_is_an_empty_success() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let (rc, reply) = run(&handler, &kernel, &[make_header(5, 2, 0).unwrap(), 7, 8]);

        assert!(rc.is_success());
        assert_eq!(reply, [make_header(5, 1, 0).unwrap(), 0, 0]);
    }

    #[test]
    fn unimplemented_command_zero_fills_reply() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let request = [make_header(0x77, 3, 0).unwrap(), 1, 2, 3];
        let (rc, reply) = run(&handler, &kernel, &request);

        let expected = IpcError::UnimplementedFunction { command_id: 0x77 }.to_rc();
        assert_eq!(rc, expected);
        assert_eq!(reply, [make_header(0x77, 1, 0).unwrap(), expected.to_raw(), 0, 0]);
    }

    #[test]
    fn oversized_header_is_malformed() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let (rc, reply) = run(&handler, &kernel, &[make_header(1, 5, 0).unwrap(), 1, 2]);

        assert_eq!(rc.description(), 48);
        assert_eq!(reply[1], rc.to_raw());
        assert_eq!(reply[2], 0);
        assert_eq!(handler.dispatched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn empty_buffer_gets_error_reply() {
        let handler = EchoHandler::default();
        let kernel = HostKernel::new(ProcessId::from_raw(1));

        let (rc, reply) = run(&handler, &kernel, &[]);

        assert!(rc.is_error());
        assert_eq!(reply, [make_header(0, 1, 0).unwrap(), rc.to_raw()]);
    }

    #[test]
    fn state_transitions() {
        use RequestState::*;

        assert!(Received.can_advance_to(Translating));
        assert!(Translating.can_advance_to(Replying));
        assert!(Dispatching.can_advance_to(Replying));
        assert!(Replying.can_advance_to(Done));
        assert!(!Received.can_advance_to(Dispatching));
        assert!(!Done.can_advance_to(Replying));
        assert!(!Replying.can_advance_to(Replying));
    }
}

//! # ctr-service
//!
//! HLE service framework for CTR (3DS) IPC.
//!
//! A client sends a synchronous request over a [`Session`]. The request is
//! validated, its descriptors are translated against the [`Kernel`]
//! (handles resolved, buffers mapped, the caller's process id injected), and
//! the resulting [`RequestContext`] is dispatched to the session's
//! [`SessionRequestHandler`]. The handler's reply is translated back (reply
//! objects become client handles) and written over the request.
//!
//! ## Components
//!
//! - [`handler`]: the per-request state machine ([`handle_sync_request`]).
//! - [`interface`]: static dispatch tables ([`Service`], [`Interface`]).
//! - [`port`]: connectable endpoints and sessions with session limits.
//! - [`registry`]: the two-namespace [`ServiceManager`].
//!
//! Every request-time failure is reported to the client as an error reply;
//! nothing in the request path panics or returns an error to the caller.
//!
//! [`Kernel`]: ctr_kernel::Kernel

mod config;
mod error;
pub mod handler;
pub mod interface;
pub mod port;
pub mod registry;
mod reply;
mod translate;

pub use self::{
    config::{DescriptorPolicy, TranslateConfig},
    error::IpcError,
    handler::{RequestContext, RequestState, SessionRequestHandler, handle_sync_request},
    interface::{
        DuplicateCommand, Function, FunctionInfo, Interface, InterfaceError, Service, Version,
    },
    port::{MaxSessionsReached, ServicePort, Session},
    registry::{ConnectError, Namespace, RegisterError, ServiceManager},
    reply::ReplyBuilder,
    translate::{PxiBuffer, StaticBuffer},
};

/// Session limit of a port unless its handler overrides it.
pub const DEFAULT_MAX_SESSIONS: u32 = 10;

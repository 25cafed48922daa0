//! CTR IPC marshaling.
//!
//! This crate implements the wire format of CTR (3DS) kernel IPC as seen by
//! an HLE service layer: a flat buffer of 32-bit words in the calling thread's
//! TLS, starting with a command header and followed by plain parameters and
//! descriptor-tagged translate parameters.
//!
//! # Message Layout
//!
//! ```text
//! Word    Field
//! ──────────────────────────────────────────────────────────────
//! 0       Header (command id, normal count, translate word count)
//! 1..     Normal parameters (copied verbatim)
//! ..      Translate parameters (descriptor word + payload words)
//! ──────────────────────────────────────────────────────────────
//! ```
//!
//! The [`header`] and [`desc`] modules are the codec: pure functions over
//! single words. [`CommandBuffer`] is the bounds-checked view over a whole
//! message.
//!
//! # References
//!
//! - [3dbrew IPC](https://www.3dbrew.org/wiki/IPC)

pub mod cmdbuf;
pub mod desc;
pub mod header;
mod port_name;

pub use self::{
    cmdbuf::{COMMAND_BUFFER_WORDS, CommandBuffer, Cursor, MalformedBuffer, OutOfBounds},
    desc::{Descriptor, DescriptorKind},
    header::Header,
    port_name::{PortName, PortNameError},
};

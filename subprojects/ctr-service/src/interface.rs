//! Command dispatch tables.
//!
//! A [`Service`] describes its commands with a static [`FunctionInfo`] table.
//! [`Interface`] indexes that table by command id and implements
//! [`SessionRequestHandler`] on top of it:
//!
//! ```ignore
//! impl Echo {
//!     const FUNCTIONS: &[FunctionInfo<Self>] = &[
//!         FunctionInfo::new(0x0001, Some(Self::echo), "Echo"),
//!         FunctionInfo::new(0x0002, None, "Reset"),
//!     ];
//! }
//!
//! impl Service for Echo {
//!     fn port_name(&self) -> &'static str {
//!         "echo"
//!     }
//!
//!     fn functions(&self) -> &'static [FunctionInfo<Self>] {
//!         Self::FUNCTIONS
//!     }
//! }
//! ```
//!
//! A `None` entry marks a command that is known but not implemented; it is
//! reported by name when a client calls it.

use core::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};
use std::collections::BTreeMap;

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

use ctr_ipc::{PortName, PortNameError};

use crate::{
    DEFAULT_MAX_SESSIONS,
    error::IpcError,
    handler::{RequestContext, SessionRequestHandler},
};

/// Service function signature.
pub type Function<S> = fn(&S, &mut RequestContext) -> Result<(), IpcError>;

/// One entry of a service's dispatch table.
pub struct FunctionInfo<S> {
    /// Command id.
    pub id: u16,
    /// Implementation, or `None` for a known but unimplemented command.
    pub func: Option<Function<S>>,
    /// Command name, for diagnostics.
    pub name: &'static str,
}

impl<S> FunctionInfo<S> {
    /// Creates a table entry.
    pub const fn new(id: u16, func: Option<Function<S>>, name: &'static str) -> Self {
        Self { id, func, name }
    }
}

impl<S> Clone for FunctionInfo<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for FunctionInfo<S> {}

impl<S> fmt::Debug for FunctionInfo<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionInfo")
            .field("id", &format_args!("{:#06x}", self.id))
            .field("implemented", &self.func.is_some())
            .field("name", &self.name)
            .finish()
    }
}

/// An HLE service.
pub trait Service: Send + Sync + Sized + 'static {
    /// Name the service is registered under (at most 8 ASCII characters).
    fn port_name(&self) -> &'static str;

    /// Maximum number of simultaneously open sessions.
    fn max_sessions(&self) -> u32 {
        DEFAULT_MAX_SESSIONS
    }

    /// Dispatch table.
    fn functions(&self) -> &'static [FunctionInfo<Self>];
}

/// Service version, as reported by the client.
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub major: B8,
    pub minor: B8,
    pub build: B8,
    pub revision: B8,
}

const_assert_eq!(size_of::<Version>(), size_of::<u32>());

impl Version {
    /// Parses a raw version word.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// Returns the raw version word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }
}

/// Dispatch table of a [`Service`], keyed by command id.
pub struct Interface<S: Service> {
    service: S,
    name: PortName,
    functions: BTreeMap<u16, FunctionInfo<S>>,
    version: AtomicU32,
}

impl<S: Service> Interface<S> {
    /// Builds the dispatch table of `service`.
    ///
    /// Fails if two entries share a command id or the port name is invalid.
    pub fn new(service: S) -> Result<Self, InterfaceError> {
        let name = PortName::new(service.port_name())?;

        let mut functions = BTreeMap::new();
        for info in service.functions() {
            if let Some(first) = functions.insert(info.id, *info) {
                return Err(DuplicateCommand {
                    port: name,
                    id: info.id,
                    first: first.name,
                    second: info.name,
                }
                .into());
            }
        }

        Ok(Self {
            service,
            name,
            functions,
            version: AtomicU32::new(0),
        })
    }

    /// Builds the dispatch table of `service`, for static startup tables.
    ///
    /// # Panics
    ///
    /// Panics if [`Interface::new`] fails.
    pub fn new_or_panic(service: S) -> Self {
        match Self::new(service) {
            Ok(interface) => interface,
            Err(err) => panic!("invalid service interface: {err}"),
        }
    }

    /// Port name.
    #[inline]
    pub fn name(&self) -> PortName {
        self.name
    }

    /// The wrapped service.
    #[inline]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Table entry for `id`.
    pub fn function(&self, id: u16) -> Option<&FunctionInfo<S>> {
        self.functions.get(&id)
    }

    /// Records the version reported by the client.
    pub fn set_version(&self, raw: u32) {
        self.version.store(raw, Ordering::Relaxed);
    }

    /// Last version reported by the client.
    pub fn version(&self) -> Version {
        Version::from_raw(self.version.load(Ordering::Relaxed))
    }
}

impl<S: Service> fmt::Debug for Interface<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("functions", &self.functions.len())
            .finish_non_exhaustive()
    }
}

impl<S: Service> SessionRequestHandler for Interface<S> {
    fn port_name(&self) -> PortName {
        self.name
    }

    fn max_sessions(&self) -> u32 {
        self.service.max_sessions()
    }

    fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
        let command_id = ctx.command_id();
        let info = self.functions.get(&command_id);

        match info.and_then(|info| info.func) {
            Some(func) => func(&self.service, ctx),
            None => {
                log::error!(
                    "unimplemented function: port={} command={:#06x} name={} header={:#010x}",
                    self.name,
                    command_id,
                    info.map_or("<unknown>", |info| info.name),
                    ctx.header().to_raw()
                );
                Err(IpcError::UnimplementedFunction { command_id })
            }
        }
    }
}

/// Two table entries share a command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{port}: command {id:#06x} registered as both {first} and {second}")]
pub struct DuplicateCommand {
    /// Service port name.
    pub port: PortName,
    /// Command id.
    pub id: u16,
    /// Name of the first entry.
    pub first: &'static str,
    /// Name of the second entry.
    pub second: &'static str,
}

/// Error returned by [`Interface::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceError {
    /// Two table entries share a command id.
    #[error(transparent)]
    DuplicateCommand(#[from] DuplicateCommand),
    /// The port name is not a valid name.
    #[error("invalid port name")]
    PortName(#[from] PortNameError),
}

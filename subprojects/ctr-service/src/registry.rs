//! Service registry.
//!
//! CTR has two independent name spaces: ports the kernel connects to by name
//! (`svcConnectToPort`, e.g. `srv:`), and services the `srv:` broker hands
//! out through `GetServiceHandle`. A name is unique within its namespace but
//! may appear in both.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use ctr_ipc::PortName;

use crate::{
    config::TranslateConfig,
    error::IpcError,
    handler::SessionRequestHandler,
    port::{ServicePort, Session},
};

/// Registry namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Named ports reachable through the kernel.
    Kernel,
    /// Services brokered by `srv:`.
    Srv,
}

/// Process-wide registry of service ports.
///
/// Created at startup and torn down with [`shutdown`](Self::shutdown); shared
/// as `Arc<ServiceManager>`.
#[derive(Debug, Default)]
pub struct ServiceManager {
    config: TranslateConfig,
    kernel_ports: RwLock<HashMap<PortName, Arc<ServicePort>>>,
    srv_services: RwLock<HashMap<PortName, Arc<ServicePort>>>,
}

impl ServiceManager {
    /// Creates an empty registry with the default translation settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry whose ports translate with `config`.
    pub fn with_config(config: TranslateConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Translation settings given to new ports.
    #[inline]
    pub fn config(&self) -> &TranslateConfig {
        &self.config
    }

    fn map(&self, namespace: Namespace) -> &RwLock<HashMap<PortName, Arc<ServicePort>>> {
        match namespace {
            Namespace::Kernel => &self.kernel_ports,
            Namespace::Srv => &self.srv_services,
        }
    }

    /// Registers `handler` under its port name.
    pub fn add_service(
        &self,
        namespace: Namespace,
        handler: Arc<dyn SessionRequestHandler>,
    ) -> Result<Arc<ServicePort>, RegisterError> {
        let port = Arc::new(ServicePort::new(handler, self.config));
        self.add_port(namespace, port.clone())?;
        Ok(port)
    }

    /// Registers `handler` at startup, where a name collision is a
    /// configuration error.
    ///
    /// # Panics
    ///
    /// Panics if [`add_service`](Self::add_service) fails.
    pub fn add_service_or_panic(
        &self,
        namespace: Namespace,
        handler: Arc<dyn SessionRequestHandler>,
    ) -> Arc<ServicePort> {
        match self.add_service(namespace, handler) {
            Ok(port) => port,
            Err(err) => panic!("service registration failed: {err}"),
        }
    }

    /// Registers an existing port.
    pub fn add_port(&self, namespace: Namespace, port: Arc<ServicePort>) -> Result<(), RegisterError> {
        let name = port.name();
        let mut map = self.map(namespace).write();
        if map.contains_key(&name) {
            return Err(RegisterError::NameAlreadyRegistered { namespace, name });
        }

        log::debug!(
            "registered {name} in {namespace:?} namespace (max sessions {})",
            port.max_sessions()
        );
        map.insert(name, port);
        Ok(())
    }

    /// Finds a port by name.
    pub fn lookup(&self, namespace: Namespace, name: &str) -> Option<Arc<ServicePort>> {
        let name = PortName::new(name).ok()?;
        self.map(namespace).read().get(&name).cloned()
    }

    /// Opens a session to the port `name`.
    pub fn connect(&self, namespace: Namespace, name: &str) -> Result<Session, ConnectError> {
        let port = self
            .lookup(namespace, name)
            .ok_or_else(|| ConnectError::NotFound(name.to_owned()))?;
        port.connect()
            .map_err(|err| ConnectError::MaxConnectionsReached(err.0))
    }

    /// Opens a session to a kernel named port.
    pub fn connect_to_named_port(&self, name: &str) -> Result<Session, ConnectError> {
        self.connect(Namespace::Kernel, name)
    }

    /// Opens a session to a `srv:` service.
    pub fn get_service_handle(&self, name: &str) -> Result<Session, ConnectError> {
        self.connect(Namespace::Srv, name)
    }

    /// Registered names in `namespace`, sorted.
    pub fn names(&self, namespace: Namespace) -> Vec<PortName> {
        let mut names: Vec<_> = self.map(namespace).read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Drops every registered port.
    ///
    /// Open sessions keep their port alive until they are closed.
    pub fn shutdown(&self) {
        let kernel = core::mem::take(&mut *self.kernel_ports.write());
        let srv = core::mem::take(&mut *self.srv_services.write());
        log::debug!(
            "service manager shut down ({} ports, {} services)",
            kernel.len(),
            srv.len()
        );
    }
}

/// Error returned by [`ServiceManager::add_port`] and
/// [`ServiceManager::add_service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// The namespace already holds that name.
    #[error("{name} already registered in {namespace:?} namespace")]
    NameAlreadyRegistered {
        /// Namespace of the registration.
        namespace: Namespace,
        /// Conflicting name.
        name: PortName,
    },
}

impl From<RegisterError> for IpcError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::NameAlreadyRegistered { name, .. } => Self::NameAlreadyRegistered(name),
        }
    }
}

/// Error returned by [`ServiceManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// No port with that name.
    #[error("port {0:?} not found")]
    NotFound(String),
    /// The port has no free sessions.
    #[error("port {0} reached its session limit")]
    MaxConnectionsReached(PortName),
}

impl From<ConnectError> for IpcError {
    fn from(err: ConnectError) -> Self {
        match err {
            // Unparsable names are never registered
            ConnectError::NotFound(name) => Self::NotFound(PortName::new(&name).unwrap_or_default()),
            ConnectError::MaxConnectionsReached(name) => Self::MaxConnectionsReached(name),
        }
    }
}

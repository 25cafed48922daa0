//! `srv:` protocol constants.

/// `srv:` named port.
pub const SRV_PORT_NAME: &str = "srv:";

/// Register client (sends PID).
pub const REGISTER_CLIENT: u16 = 0x0001;

/// Enable service notifications (returns a semaphore).
pub const ENABLE_NOTIFICATION: u16 = 0x0002;

/// Register a new service.
pub const REGISTER_SERVICE: u16 = 0x0003;

/// Get service handle by name.
pub const GET_SERVICE_HANDLE: u16 = 0x0005;

/// Largest service name length.
pub const MAX_NAME_LEN: u32 = 8;

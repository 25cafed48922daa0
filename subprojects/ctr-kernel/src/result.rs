//! CTR result codes.
//!
//! Every IPC reply carries a 32-bit result code in its first normal parameter.
//! A zero word means success; any other value encodes where and why a request
//! failed.
//!
//! # Structure
//!
//! - **Bits 0-9:** Description
//! - **Bits 10-17:** Module
//! - **Bits 18-20:** Reserved
//! - **Bits 21-26:** Summary
//! - **Bits 27-31:** Level
//!
//! # References
//! - [3dbrew: Error codes](https://www.3dbrew.org/wiki/Error_codes)

use core::fmt;

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

/// A CTR result code.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultCode {
    /// What went wrong.
    pub description: B10,
    /// The subsystem reporting the error.
    pub module: B8,
    #[skip]
    __reserved: B3,
    /// Broad error category.
    pub summary: B6,
    /// Severity.
    pub level: B5,
}

const_assert_eq!(size_of::<ResultCode>(), size_of::<u32>());

impl ResultCode {
    /// The success result.
    pub const SUCCESS: u32 = 0;

    /// Creates a result code from a raw word.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// Returns the raw word of this result code.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// Returns the success result code.
    #[inline]
    pub fn success() -> Self {
        Self::from_raw(Self::SUCCESS)
    }

    /// Creates a result code from its parts.
    pub fn from_parts(
        description: ErrorDescription,
        module: ErrorModule,
        summary: ErrorSummary,
        level: ErrorLevel,
    ) -> Self {
        Self::new()
            .with_description(description as u16)
            .with_module(module as u8)
            .with_summary(summary as u8)
            .with_level(level as u8)
    }

    /// Returns `true` if this result code represents a success.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.to_raw() == Self::SUCCESS
    }

    /// Returns `true` if this result code represents a failure.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.is_success()
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCode")
            .field("raw", &format_args!("{:#010x}", self.to_raw()))
            .field("description", &self.description())
            .field("module", &self.module())
            .field("summary", &self.summary())
            .field("level", &self.level())
            .finish()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.to_raw())
    }
}

impl From<u32> for ResultCode {
    fn from(value: u32) -> Self {
        Self::from_raw(value)
    }
}

impl From<ResultCode> for u32 {
    fn from(value: ResultCode) -> Self {
        value.to_raw()
    }
}

/// Conversion of an error into the result code reported to the guest.
pub trait ToRawResultCode {
    /// Returns the guest-visible result code for this error.
    fn to_rc(self) -> ResultCode;
}

/// Error descriptions used by the IPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorDescription {
    Success = 0,
    WrongPermission = 46,
    InvalidBufferDescriptor = 48,
    MaxConnectionsReached = 52,
    InvalidSection = 1000,
    TooLarge = 1001,
    NotAuthorized = 1002,
    AlreadyDone = 1003,
    InvalidSize = 1004,
    InvalidEnumValue = 1005,
    InvalidCombination = 1006,
    NoData = 1007,
    Busy = 1008,
    MisalignedAddress = 1009,
    MisalignedSize = 1010,
    OutOfMemory = 1011,
    NotImplemented = 1012,
    InvalidAddress = 1013,
    InvalidPointer = 1014,
    InvalidHandle = 1015,
    NotInitialized = 1016,
    AlreadyInitialized = 1017,
    NotFound = 1018,
    CancelRequested = 1019,
    AlreadyExists = 1020,
    OutOfRange = 1021,
    Timeout = 1022,
    InvalidResultValue = 1023,
}

/// Subsystems that report result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorModule {
    Common = 0,
    Kernel = 1,
    Util = 2,
    FileServer = 3,
    LoaderServer = 4,
    Tcb = 5,
    Os = 6,
    Dbg = 7,
    Dmnt = 8,
    Pdn = 9,
    Gsp = 10,
    I2c = 11,
    Gpio = 12,
    Dd = 13,
    Codec = 14,
    Spi = 15,
    Pxi = 16,
    Fs = 17,
    Di = 18,
    Hid = 19,
    Cam = 20,
    Pi = 21,
    Pm = 22,
    PmLow = 23,
    Fsi = 24,
    Srv = 25,
}

/// Broad error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorSummary {
    Success = 0,
    NothingHappened = 1,
    WouldBlock = 2,
    OutOfResource = 3,
    NotFound = 4,
    InvalidState = 5,
    NotSupported = 6,
    InvalidArgument = 7,
    WrongArgument = 8,
    Canceled = 9,
    StatusChanged = 10,
    Internal = 11,
}

/// Error severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorLevel {
    Success = 0,
    Info = 1,
    Status = 25,
    Temporary = 26,
    Permanent = 27,
    Usage = 28,
    Reinitialize = 29,
    Reset = 30,
    Fatal = 31,
}

//! Port name type.
//!
//! Port and service names on CTR are at most 8 ASCII characters. Guests pass
//! them over IPC as two little-endian words plus an explicit length, so the
//! name is stored NUL padded in an 8-byte array.

use core::fmt;

use static_assertions::const_assert_eq;

/// Fixed-capacity ASCII name of a port or service (max 8 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PortName {
    name: [u8; 8],
    len: u8,
}

const_assert_eq!(PortName::MAX_LEN, 8);

impl PortName {
    /// Maximum length of a port name (8 characters).
    pub const MAX_LEN: usize = 8;

    /// Creates a port name from a string slice.
    pub fn new(name: &str) -> Result<Self, PortNameError> {
        Self::from_bytes(name.as_bytes())
    }

    /// Creates a port name from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PortNameError> {
        if bytes.len() > Self::MAX_LEN {
            return Err(PortNameError::TooLong(bytes.len()));
        }
        if let Some(&byte) = bytes.iter().find(|b| !b.is_ascii() || **b == 0) {
            return Err(PortNameError::InvalidByte(byte));
        }

        let mut name = [0u8; 8];
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            name,
            len: bytes.len() as u8,
        })
    }

    /// Creates a port name from the two-word, length-prefixed IPC encoding.
    ///
    /// Bytes past `len` are ignored.
    pub fn from_words(words: [u32; 2], len: u32) -> Result<Self, PortNameError> {
        let len = len as usize;
        if len > Self::MAX_LEN {
            return Err(PortNameError::TooLong(len));
        }

        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&words[0].to_le_bytes());
        bytes[4..].copy_from_slice(&words[1].to_le_bytes());
        Self::from_bytes(&bytes[..len])
    }

    /// Returns the two-word IPC encoding of the name.
    pub fn to_words(&self) -> [u32; 2] {
        [
            u32::from_le_bytes([self.name[0], self.name[1], self.name[2], self.name[3]]),
            u32::from_le_bytes([self.name[4], self.name[5], self.name[6], self.name[7]]),
        ]
    }

    /// Returns the bytes of the name (excluding padding).
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.name[..self.len as usize]
    }

    /// Returns the length of the name.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns whether the name is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        // SAFETY: Constructors only accept ASCII bytes (subset of UTF-8).
        unsafe { core::str::from_utf8_unchecked(self.as_bytes()) }
    }
}

impl fmt::Display for PortName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl fmt::Debug for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PortName").field(&self.as_str()).finish()
    }
}

impl TryFrom<&str> for PortName {
    type Error = PortNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl PartialEq<str> for PortName {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for PortName {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<PortName> for &str {
    #[inline]
    fn eq(&self, other: &PortName) -> bool {
        other == self
    }
}

/// Error returned when building a [`PortName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortNameError {
    /// More than 8 characters.
    #[error("port name length {0} exceeds 8")]
    TooLong(usize),
    /// Non-ASCII or NUL byte.
    #[error("invalid byte {0:#04x} in port name")]
    InvalidByte(u8),
}

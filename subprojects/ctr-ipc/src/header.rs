//! Command header codec.
//!
//! ```text
//! Bits 0-5:   translate parameter size in words (max 63)
//! Bits 6-11:  normal parameter count (max 63)
//! Bits 12-15: reserved
//! Bits 16-31: command id
//! ```
//!
//! Normal parameters are handed to the service untouched. Translate parameters
//! are descriptors the kernel inspects and rewrites; their size counts the
//! descriptor words themselves.

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

/// Largest normal parameter count or translate word count a header can carry.
pub const MAX_PARAMS: u32 = 0x3F;

/// Reserved bits, dropped when parsing.
const RESERVED_MASK: u32 = 0xF000;

/// IPC command header (one word).
#[bitfield]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    /// Words of translate parameters, descriptors included.
    pub translate_params_size: B6,
    /// Number of normal parameter words.
    pub normal_params: B6,
    #[skip]
    __reserved: B4,
    /// Operation selector.
    pub command_id: B16,
}

const_assert_eq!(size_of::<Header>(), size_of::<u32>());

impl Header {
    /// Creates a header, checking both counts against [`MAX_PARAMS`].
    pub fn make(
        command_id: u16,
        normal_params: u32,
        translate_params_size: u32,
    ) -> Result<Self, HeaderError> {
        if normal_params > MAX_PARAMS {
            return Err(HeaderError::NormalParamsTooLarge(normal_params));
        }
        if translate_params_size > MAX_PARAMS {
            return Err(HeaderError::TranslateParamsTooLarge(translate_params_size));
        }

        Ok(Self::new()
            .with_command_id(command_id)
            .with_normal_params(normal_params as u8)
            .with_translate_params_size(translate_params_size as u8))
    }

    /// Parses a header word.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bytes((raw & !RESERVED_MASK).to_le_bytes())
    }

    /// Returns the header word.
    #[inline]
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    /// Number of words the message occupies, header included.
    #[inline]
    pub fn total_words(&self) -> usize {
        1 + self.normal_params() as usize + self.translate_params_size() as usize
    }
}

/// Creates a raw header word.
///
/// See [`Header::make`].
pub fn make_header(
    command_id: u16,
    normal_params: u32,
    translate_params_size: u32,
) -> Result<u32, HeaderError> {
    Header::make(command_id, normal_params, translate_params_size).map(Header::to_raw)
}

/// Parses a raw header word.
#[inline]
pub fn parse_header(raw: u32) -> Header {
    Header::from_raw(raw)
}

/// Error returned by [`make_header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// More than 63 normal parameters.
    #[error("normal parameter count {0} exceeds 63")]
    NormalParamsTooLarge(u32),
    /// More than 63 translate parameter words.
    #[error("translate parameter size {0} exceeds 63")]
    TranslateParamsTooLarge(u32),
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn make_header_matches_wire_layout() {
        assert_eq!(make_header(0x0005, 4, 0), Ok(0x0005_0100));
        assert_eq!(make_header(0x0001, 0, 2), Ok(0x0001_0002));
        assert_eq!(make_header(0x0005, 1, 2), Ok(0x0005_0042));
    }

    #[test]
    fn make_header_rejects_oversized_counts() {
        assert_eq!(
            make_header(1, 64, 0),
            Err(HeaderError::NormalParamsTooLarge(64))
        );
        assert_eq!(
            make_header(1, 0, 64),
            Err(HeaderError::TranslateParamsTooLarge(64))
        );
    }

    #[test]
    fn parse_header_drops_reserved_bits() {
        let header = parse_header(0x0001_F082);

        assert_eq!(header.command_id(), 1);
        assert_eq!(header.normal_params(), 2);
        assert_eq!(header.translate_params_size(), 2);
        assert_eq!(header.to_raw(), 0x0001_0082);
        assert_eq!(header.total_words(), 5);
    }

    proptest! {
        #[test]
        fn header_round_trips(id in any::<u16>(), normal in 0u32..=63, translate in 0u32..=63) {
            let header = parse_header(make_header(id, normal, translate).unwrap());

            prop_assert_eq!(header.command_id(), id);
            prop_assert_eq!(header.normal_params() as u32, normal);
            prop_assert_eq!(header.translate_params_size() as u32, translate);
        }
    }
}

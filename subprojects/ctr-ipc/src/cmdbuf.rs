//! Bounds-checked command buffer view.
//!
//! A [`CommandBuffer`] owns a copy of one in-flight message. It has a fixed
//! capacity large enough for the biggest message a header can describe and a
//! declared length: every word access is checked against the declared length,
//! never against the capacity.

use static_assertions::const_assert;

use ctr_kernel::ControlMemory;

use crate::{
    desc::{Descriptor, UnknownDescriptor},
    header::{Header, MAX_PARAMS},
};

/// Capacity of a command buffer in words.
pub const COMMAND_BUFFER_WORDS: usize = 0x80;

const_assert!(COMMAND_BUFFER_WORDS >= 1 + 2 * MAX_PARAMS as usize);

/// Owned, fixed-capacity message buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    words: [u32; COMMAND_BUFFER_WORDS],
    len: usize,
}

impl CommandBuffer {
    /// Creates a zeroed buffer using the full capacity.
    pub fn new() -> Self {
        Self {
            words: [0; COMMAND_BUFFER_WORDS],
            len: COMMAND_BUFFER_WORDS,
        }
    }

    /// Creates a zeroed buffer of `len` words.
    pub fn with_len(len: usize) -> Result<Self, OutOfBounds> {
        if len > COMMAND_BUFFER_WORDS {
            return Err(OutOfBounds {
                index: len,
                len: COMMAND_BUFFER_WORDS,
            });
        }

        Ok(Self {
            words: [0; COMMAND_BUFFER_WORDS],
            len,
        })
    }

    /// Creates a buffer holding a copy of `words`.
    pub fn from_words(words: &[u32]) -> Result<Self, OutOfBounds> {
        let mut buf = Self::with_len(words.len())?;
        buf.words[..words.len()].copy_from_slice(words);
        Ok(buf)
    }

    /// Reads `len` words from the start of a control-buffer region.
    pub fn load<M: ControlMemory + ?Sized>(memory: &M, len: usize) -> Result<Self, OutOfBounds> {
        let mut buf = Self::with_len(len)?;
        for (index, word) in buf.words[..len].iter_mut().enumerate() {
            *word = memory.read_word(word_offset(index));
        }
        Ok(buf)
    }

    /// Writes the buffer back to the start of a control-buffer region.
    pub fn store<M: ControlMemory + ?Sized>(&self, memory: &mut M) {
        for (index, word) in self.as_words().iter().enumerate() {
            memory.write_word(word_offset(index), *word);
        }
    }

    /// Declared length in words.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no words.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the words within the declared length.
    #[inline]
    pub fn as_words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    /// Reads the word at `index`.
    #[inline]
    pub fn read_word(&self, index: usize) -> Result<u32, OutOfBounds> {
        self.as_words().get(index).copied().ok_or(OutOfBounds {
            index,
            len: self.len,
        })
    }

    /// Writes the word at `index`.
    #[inline]
    pub fn write_word(&mut self, index: usize, value: u32) -> Result<(), OutOfBounds> {
        let len = self.len;
        let word = self.words[..len]
            .get_mut(index)
            .ok_or(OutOfBounds { index, len })?;
        *word = value;
        Ok(())
    }

    /// Reads word 0 as a header, without checking the declared counts.
    pub fn read_header(&self) -> Result<Header, OutOfBounds> {
        self.read_word(0).map(Header::from_raw)
    }

    /// Writes `header` to word 0.
    pub fn write_header(&mut self, header: Header) -> Result<(), OutOfBounds> {
        self.write_word(0, header.to_raw())
    }

    /// Reads the header and checks that the message it declares fits.
    pub fn validate(&self) -> Result<Header, MalformedBuffer> {
        let header = self.read_header().map_err(|_| MalformedBuffer::Empty)?;
        let declared = header.total_words();
        if declared > self.len {
            return Err(MalformedBuffer::TooShort {
                declared,
                len: self.len,
            });
        }
        Ok(header)
    }

    /// Returns the normal parameter words.
    pub fn normal_params(&self) -> Result<&[u32], MalformedBuffer> {
        let header = self.validate()?;
        Ok(&self.words[1..1 + header.normal_params() as usize])
    }

    /// Returns a cursor over the translate parameter region.
    pub fn translate_cursor(&self) -> Result<Cursor<'_>, MalformedBuffer> {
        let header = self.validate()?;
        let start = 1 + header.normal_params() as usize;
        Ok(Cursor {
            words: &self.words[..header.total_words()],
            pos: start,
        })
    }

    /// Zero-fills every word after the header.
    pub fn clear_payload(&mut self) {
        let len = self.len;
        if len > 1 {
            self.words[1..len].fill(0);
        }
    }

    /// Replaces the contents with `message`.
    ///
    /// Words past the message are zeroed up to the current length; the length
    /// grows if the message is longer.
    pub fn overwrite(&mut self, message: &CommandBuffer) {
        let len = self.len.max(message.len);
        self.words[..message.len].copy_from_slice(message.as_words());
        self.words[message.len..len].fill(0);
        self.len = len;
    }

    /// Sets the declared length, zeroing any newly exposed words.
    pub fn set_len(&mut self, len: usize) -> Result<(), OutOfBounds> {
        if len > COMMAND_BUFFER_WORDS {
            return Err(OutOfBounds {
                index: len,
                len: COMMAND_BUFFER_WORDS,
            });
        }
        if len > self.len {
            self.words[self.len..len].fill(0);
        }
        self.len = len;
        Ok(())
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.len)
            .field("words", &format_args!("{:08x?}", self.as_words()))
            .finish()
    }
}

#[inline]
fn word_offset(index: usize) -> u32 {
    (index * size_of::<u32>()) as u32
}

/// Sequential reader over a translate parameter region.
///
/// Descriptor payload sizes are self-describing, so descriptors can only be
/// located by walking them in order.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    words: &'a [u32],
    pos: usize,
}

impl Cursor<'_> {
    /// Index of the next word in the command buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Words left in the region.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.words.len().saturating_sub(self.pos)
    }

    /// Returns `true` once the whole region was consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes the next word.
    pub fn next_word(&mut self) -> Result<u32, OutOfBounds> {
        let word = self.words.get(self.pos).copied().ok_or(OutOfBounds {
            index: self.pos,
            len: self.words.len(),
        })?;
        self.pos += 1;
        Ok(word)
    }

    /// Consumes the next descriptor word, using the static buffer fallback.
    ///
    /// The descriptor's payload words are *not* consumed.
    pub fn next_descriptor(&mut self) -> Result<Descriptor, OutOfBounds> {
        self.next_word().map(Descriptor::parse)
    }

    /// Consumes the next descriptor word, rejecting unknown patterns.
    pub fn next_descriptor_strict(&mut self) -> Result<Descriptor, MalformedBuffer> {
        let word = self.next_word()?;
        Descriptor::parse_strict(word).map_err(MalformedBuffer::from)
    }

    /// Checks that a descriptor starting at `start` with `descriptor`'s word
    /// count ends inside the region.
    pub fn check_fits(&self, start: usize, descriptor: &Descriptor) -> Result<(), MalformedBuffer> {
        let end = start + descriptor.word_count();
        if end > self.words.len() {
            return Err(MalformedBuffer::DescriptorOverrun {
                index: start,
                end,
                region_end: self.words.len(),
            });
        }
        Ok(())
    }
}

/// Word access beyond the declared buffer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("word {index} out of bounds (len {len})")]
pub struct OutOfBounds {
    /// Index accessed.
    pub index: usize,
    /// Declared length.
    pub len: usize,
}

/// A message whose header or descriptors are inconsistent with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedBuffer {
    /// The buffer has no header word.
    #[error("empty command buffer")]
    Empty,
    /// The header declares more words than the buffer holds.
    #[error("header declares {declared} words but buffer holds {len}")]
    TooShort {
        /// Words the header declares.
        declared: usize,
        /// Declared buffer length.
        len: usize,
    },
    /// A descriptor's payload runs past the translate region.
    #[error("descriptor at word {index} ends at {end}, past translate region end {region_end}")]
    DescriptorOverrun {
        /// Index of the descriptor word.
        index: usize,
        /// Index one past the descriptor's last word.
        end: usize,
        /// Index one past the translate region.
        region_end: usize,
    },
    /// A descriptor word matches no family.
    #[error(transparent)]
    UnknownDescriptor(#[from] UnknownDescriptor),
    /// A mapped buffer descriptor grants no permission.
    #[error("mapped buffer descriptor {0:#010x} has no permissions")]
    NoPermissions(u32),
    /// The region ended inside a descriptor.
    #[error(transparent)]
    Truncated(#[from] OutOfBounds),
}

#[cfg(test)]
mod tests {
    use ctr_kernel::host::HostMemory;

    use super::*;
    use crate::{
        desc::{move_handle_desc, static_buffer_desc},
        header::make_header,
    };

    #[test]
    fn word_access_is_checked_against_declared_length() {
        let mut buf = CommandBuffer::from_words(&[0, 1, 2]).unwrap();

        assert_eq!(buf.read_word(2), Ok(2));
        assert_eq!(buf.read_word(3), Err(OutOfBounds { index: 3, len: 3 }));
        assert_eq!(
            buf.write_word(3, 9),
            Err(OutOfBounds { index: 3, len: 3 })
        );
        assert_eq!(buf.as_words(), &[0, 1, 2]);
    }

    #[test]
    fn capacity_is_enforced() {
        assert!(CommandBuffer::with_len(COMMAND_BUFFER_WORDS).is_ok());
        assert!(CommandBuffer::with_len(COMMAND_BUFFER_WORDS + 1).is_err());
    }

    #[test]
    fn oversized_header_is_malformed() {
        let header = make_header(1, 3, 2).unwrap();
        let buf = CommandBuffer::from_words(&[header, 10, 20, 30]).unwrap();

        assert_eq!(
            buf.validate(),
            Err(MalformedBuffer::TooShort {
                declared: 6,
                len: 4
            })
        );
        assert!(buf.normal_params().is_err());
        assert!(buf.translate_cursor().is_err());
    }

    #[test]
    fn empty_buffer_is_malformed() {
        let buf = CommandBuffer::with_len(0).unwrap();
        assert_eq!(buf.validate(), Err(MalformedBuffer::Empty));
    }

    #[test]
    fn cursor_walks_descriptors_in_order() {
        let words = [
            make_header(7, 1, 5).unwrap(),
            0xAAAA,
            move_handle_desc(2).unwrap(),
            0x8001,
            0x8002,
            static_buffer_desc(0x10, 1).unwrap(),
            0x1000_0000,
        ];
        let buf = CommandBuffer::from_words(&words).unwrap();
        assert_eq!(buf.normal_params().unwrap(), &[0xAAAA]);

        let mut cursor = buf.translate_cursor().unwrap();
        assert_eq!(cursor.position(), 2);
        assert_eq!(
            cursor.next_descriptor(),
            Ok(Descriptor::MoveHandles { count: 2 })
        );
        assert_eq!(cursor.next_word(), Ok(0x8001));
        assert_eq!(cursor.next_word(), Ok(0x8002));

        let desc = cursor.next_descriptor().unwrap();
        assert!(matches!(desc, Descriptor::StaticBuffer(_)));
        assert_eq!(cursor.next_word(), Ok(0x1000_0000));
        assert!(cursor.is_empty());
        assert!(cursor.next_word().is_err());
    }

    #[test]
    fn cursor_detects_descriptor_overrun() {
        let words = [make_header(7, 0, 2).unwrap(), move_handle_desc(3).unwrap(), 0x8001];
        let buf = CommandBuffer::from_words(&words).unwrap();
        let mut cursor = buf.translate_cursor().unwrap();

        let start = cursor.position();
        let desc = cursor.next_descriptor().unwrap();
        assert_eq!(
            cursor.check_fits(start, &desc),
            Err(MalformedBuffer::DescriptorOverrun {
                index: 1,
                end: 5,
                region_end: 3
            })
        );
    }

    #[test]
    fn clear_payload_keeps_header() {
        let mut buf = CommandBuffer::from_words(&[0x0001_0080, 5, 6]).unwrap();
        buf.clear_payload();

        assert_eq!(buf.as_words(), &[0x0001_0080, 0, 0]);
    }

    #[test]
    fn overwrite_zero_fills_stale_words() {
        let mut buf = CommandBuffer::from_words(&[0x0001_00C0, 1, 2, 3]).unwrap();
        buf.overwrite(&CommandBuffer::from_words(&[0x0001_0040, 0]).unwrap());
        assert_eq!(buf.as_words(), &[0x0001_0040, 0, 0, 0]);

        let mut short = CommandBuffer::from_words(&[0x0001_0000]).unwrap();
        short.overwrite(&CommandBuffer::from_words(&[0x0001_0080, 7, 8]).unwrap());
        assert_eq!(short.as_words(), &[0x0001_0080, 7, 8]);
    }

    #[test]
    fn load_and_store_use_byte_offsets() {
        let mut memory = HostMemory::from_words(&[0x0001_0040, 42, 0xDEAD]);
        let mut buf = CommandBuffer::load(&memory, 2).unwrap();
        assert_eq!(buf.as_words(), &[0x0001_0040, 42]);

        buf.write_word(1, 43).unwrap();
        buf.store(&mut memory);
        assert_eq!(memory.words(), &[0x0001_0040, 43, 0xDEAD]);
    }
}

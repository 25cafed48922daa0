//! Reply construction.

use ctr_ipc::{
    CommandBuffer, Header,
    desc::{DescriptorError, copy_handle_desc, move_handle_desc, static_buffer_desc},
};
use ctr_kernel::{ObjectRef, ResultCode};

use crate::{error::IpcError, handler::RequestContext};

/// Builds the reply to a request.
///
/// The result code always occupies the first normal word. Normal words and
/// translate words are collected separately and the header counts are derived
/// from them in [`finish`](Self::finish).
pub struct ReplyBuilder<'a> {
    ctx: &'a mut RequestContext,
    normal: Vec<u32>,
    translate: Vec<u32>,
    objects: Vec<ObjectRef>,
}

impl<'a> ReplyBuilder<'a> {
    pub(crate) fn new(ctx: &'a mut RequestContext) -> Self {
        Self {
            ctx,
            normal: vec![ResultCode::SUCCESS],
            translate: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Sets the result code.
    pub fn result(&mut self, rc: ResultCode) -> &mut Self {
        self.normal[0] = rc.to_raw();
        self
    }

    /// Appends a normal word.
    pub fn push(&mut self, word: u32) -> &mut Self {
        self.normal.push(word);
        self
    }

    /// Appends a 64-bit value as two normal words, low word first.
    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.push(value as u32).push((value >> 32) as u32)
    }

    /// Appends copy-handle descriptors for `objects`.
    ///
    /// The service keeps its own references; the client receives new handles.
    pub fn push_copy_objects<I>(&mut self, objects: I) -> Result<&mut Self, IpcError>
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        self.push_objects(objects, copy_handle_desc)
    }

    /// Appends move-handle descriptors for `objects`.
    pub fn push_move_objects<I>(&mut self, objects: I) -> Result<&mut Self, IpcError>
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        self.push_objects(objects, move_handle_desc)
    }

    fn push_objects<I>(
        &mut self,
        objects: I,
        make_desc: fn(u32) -> Result<u32, DescriptorError>,
    ) -> Result<&mut Self, IpcError>
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        let objects: Vec<_> = objects.into_iter().collect();
        if objects.is_empty() {
            return Ok(self);
        }

        self.translate.push(make_desc(objects.len() as u32)?);
        // Handle slots are filled when the reply is translated
        self.translate.extend(core::iter::repeat_n(0, objects.len()));
        self.objects.extend(objects);
        Ok(self)
    }

    /// Appends a static buffer descriptor pointing at `address`.
    pub fn push_static_buffer(
        &mut self,
        address: u32,
        size: u32,
        buffer_id: u8,
    ) -> Result<&mut Self, IpcError> {
        self.translate.push(static_buffer_desc(size, buffer_id)?);
        self.translate.push(address);
        Ok(self)
    }

    /// Writes the reply into the request context.
    pub fn finish(self) -> Result<(), IpcError> {
        let header = Header::make(
            self.ctx.command_id(),
            self.normal.len() as u32,
            self.translate.len() as u32,
        )?;

        let mut words = Vec::with_capacity(header.total_words());
        words.push(header.to_raw());
        words.extend(self.normal);
        words.extend(self.translate);

        let buffer = CommandBuffer::from_words(&words)?;
        self.ctx.reply = Some((buffer, self.objects));
        Ok(())
    }
}

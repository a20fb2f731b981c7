//! # Message Format
//!
//! Requests and replies follow the platform's IPC command buffer layout: a
//! header word naming the command and the number of "normal" (plain `u32`)
//! and "translate" (buffer descriptor) words that follow, then the words
//! themselves.
//!
//! Here the parameter words and buffer descriptors are kept in separate
//! vectors rather than packed into one buffer, but the header still counts
//! them the way the platform does: every buffer descriptor is two words.

use core::fmt;

use mycelium_bitfield::bitfield;

use crate::ResultCode;

bitfield! {
    /// A command header word.
    #[derive(PartialEq, Eq, Hash)]
    pub struct Header<u32> {
        /// Number of translate words (two per buffer descriptor).
        pub const TRANSLATE = 6;
        /// Number of normal parameter words.
        pub const NORMAL = 6;
        const _RESERVED_0 = 4;
        pub const COMMAND_ID = 16;
    }
}

/// A client request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub header: Header,
    pub params: Vec<u32>,
    pub buffers: Vec<Buffer>,
}

/// The service's response to a [`Request`].
///
/// The result code always comes first, and is counted as a normal word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub header: Header,
    pub result: ResultCode,
    pub params: Vec<u32>,
    pub buffers: Vec<Buffer>,
}

/// A buffer descriptor and its contents.
#[derive(Clone, PartialEq, Eq)]
pub enum Buffer {
    /// Copied into (or out of) a numbered static buffer slot of the receiver.
    Static { id: u8, data: Vec<u8> },
    /// Mapped from the sender's address space, with the given permission.
    Mapped { perm: Perm, data: Vec<u8> },
}

/// Access the receiver has to a [`Buffer::Mapped`] buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Perm {
    Read,
    Write,
}

// === impl Header ===

impl Header {
    pub const fn make(command_id: u16, normal: usize, translate: usize) -> Self {
        let normal = (normal as u32) & 0x3F;
        let translate = (translate as u32) & 0x3F;
        Self::from_bits((command_id as u32) << 16 | normal << 6 | translate)
    }

    pub fn command_id(self) -> u16 {
        self.get(Self::COMMAND_ID) as u16
    }

    pub fn normal(self) -> usize {
        self.get(Self::NORMAL) as usize
    }

    pub fn translate(self) -> usize {
        self.get(Self::TRANSLATE) as usize
    }
}

// === impl Request ===

impl Request {
    /// A request for `command_id` with no arguments yet.
    pub fn new(command_id: u16) -> Self {
        Self {
            header: Header::make(command_id, 0, 0),
            params: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Append a normal parameter word, keeping the header's counts in step.
    pub fn with_param(mut self, word: u32) -> Self {
        self.params.push(word);
        self.recount()
    }

    /// Append a buffer descriptor, keeping the header's counts in step.
    pub fn with_buffer(mut self, buffer: Buffer) -> Self {
        self.buffers.push(buffer);
        self.recount()
    }

    /// Replace the header outright, whether or not it matches the contents.
    pub fn with_header(self, header: Header) -> Self {
        Self { header, ..self }
    }

    pub fn command_id(&self) -> u16 {
        self.header.command_id()
    }

    fn recount(mut self) -> Self {
        self.header = Header::make(
            self.header.command_id(),
            self.params.len(),
            self.buffers.len() * 2,
        );
        self
    }
}

// === impl Reply ===

impl Reply {
    pub fn new(command_id: u16, result: impl Into<ResultCode>) -> Self {
        Self {
            header: Header::make(command_id, 1, 0),
            result: result.into(),
            params: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// The reply to a request that could not be dispatched at all.
    pub fn error(result: impl Into<ResultCode>) -> Self {
        Self::new(0, result)
    }

    pub fn with_param(mut self, word: u32) -> Self {
        self.params.push(word);
        self.recount()
    }

    pub fn with_buffer(mut self, buffer: Buffer) -> Self {
        self.buffers.push(buffer);
        self.recount()
    }

    /// The contents of the `index`th buffer in the reply, if there is one.
    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(Buffer::data)
    }

    fn recount(mut self) -> Self {
        self.header = Header::make(
            self.header.command_id(),
            1 + self.params.len(),
            self.buffers.len() * 2,
        );
        self
    }
}

// === impl Buffer ===

impl Buffer {
    pub fn data(&self) -> &[u8] {
        match self {
            Buffer::Static { data, .. } | Buffer::Mapped { data, .. } => data,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Returns the contents if this is static buffer slot `id`.
    pub fn as_static(&self, id: u8) -> Option<&[u8]> {
        match self {
            Buffer::Static { id: slot, data } if *slot == id => Some(data),
            _ => None,
        }
    }

    /// Returns the contents if this is a mapped buffer with permission `perm`.
    pub fn as_mapped(&self, perm: Perm) -> Option<&[u8]> {
        match self {
            Buffer::Mapped { perm: p, data } if *p == perm => Some(data),
            _ => None,
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Buffer::Static { id, data } => f
                .debug_struct("Static")
                .field("id", id)
                .field("len", &data.len())
                .finish(),
            Buffer::Mapped { perm, data } => f
                .debug_struct("Mapped")
                .field("perm", perm)
                .field("len", &data.len())
                .finish(),
        }
    }
}

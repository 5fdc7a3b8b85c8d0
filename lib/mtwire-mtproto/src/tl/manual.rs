// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Records whose layout cannot be described with plain fields, because
//! they embed other serialized objects verbatim.
use super::{Cursor, Deserializable, Error, Identifiable, Result, Serializable};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

/// A message as found inside a container: `msg_id`, `seqno`, length and
/// the body.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// `msg_id`, `seqno` and the body length.
    pub const SIZE_OVERHEAD: usize = 16;

    pub fn constructor_id(&self) -> Result<u32> {
        u32::from_bytes(&self.body)
    }

    /// Content-related messages have an odd sequence number and must be
    /// acknowledged.
    pub fn requires_ack(&self) -> bool {
        self.seq_no & 1 == 1
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?;
        if len < 0 || len as usize > MessageContainer::MAXIMUM_SIZE {
            return Err(Error::UnexpectedEof);
        }
        let body = buf.read_exact(len as usize)?.to_vec();

        Ok(Self {
            msg_id,
            seq_no,
            body,
        })
    }
}

/// `rpc_result`. The result is kept serialized, since only the caller
/// knows what type to expect.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let result = buf.read_to_end().to_vec();
        Ok(Self { req_msg_id, result })
    }
}

/// `msg_container`.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    /// Constructor and item count.
    pub const SIZE_OVERHEAD: usize = 8;

    /// The largest payload a container may carry before the server closes
    /// the connection.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// The most messages a container may hold. Past this the server answers
    /// with bad message code 64.
    pub const MAXIMUM_LENGTH: usize = 100;
}

impl Identifiable for MessageContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MessageContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        self.messages.iter().for_each(|m| m.serialize(buf));
    }
}

impl Deserializable for MessageContainer {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let len = u32::deserialize(buf)? as usize;
        if len > buf.remaining() / Message::SIZE_OVERHEAD {
            return Err(Error::UnexpectedEof);
        }

        let messages = (0..len)
            .map(|_| Message::deserialize(buf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { messages })
    }
}

/// `msg_copy`, a message re-sent inside another.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageCopy {
    pub orig_message: Message,
}

impl Identifiable for MessageCopy {
    const CONSTRUCTOR_ID: u32 = 0xe06046b2;
}

impl Serializable for MessageCopy {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.orig_message.serialize(buf);
    }
}

impl Deserializable for MessageCopy {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            orig_message: Message::deserialize(buf)?,
        })
    }
}

/// `gzip_packed`, a gzip-compressed serialized object.
#[derive(Clone, Debug, PartialEq)]
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub fn new(unpacked_data: &[u8]) -> io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(unpacked_data)?;
        Ok(Self {
            packed_data: encoder.finish()?,
        })
    }

    pub fn decompress(&self) -> io::Result<Vec<u8>> {
        let mut unpacked = Vec::new();
        GzDecoder::new(&self.packed_data[..]).read_to_end(&mut unpacked)?;
        Ok(unpacked)
    }
}

impl Identifiable for GzipPacked {
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            packed_data: Vec::<u8>::deserialize(buf)?,
        })
    }
}

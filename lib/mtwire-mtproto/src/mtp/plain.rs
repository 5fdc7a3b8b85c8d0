// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Deserialization, DeserializeError, Mtp, RpcResult};
use crate::MsgId;
use crate::tl::{Cursor, Deserializable, Serializable};
use crate::utils;

/// auth_key_id, msg_id and length.
pub const PLAIN_HEADER_LEN: usize = 20;

/// [Unencrypted messages], only used while there is no key to encrypt with.
///
/// Exactly one request can be pushed before each `finalize`. Only one
/// exchange is ever in flight, so requests and their results are all
/// identified as `MsgId(0)`.
///
/// [Unencrypted messages]: https://core.telegram.org/mtproto/description#unencrypted-message
#[derive(Default)]
pub struct Plain {
    last_msg_id: i64,
}

impl Plain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mtp for Plain {
    fn push(&mut self, buffer: &mut Vec<u8>, request: &[u8]) -> Option<MsgId> {
        if !buffer.is_empty() {
            return None;
        }

        let msg_id = utils::next_msg_id(&mut self.last_msg_id, 0);
        0i64.serialize(buffer); // auth_key_id
        msg_id.serialize(buffer);
        (request.len() as i32).serialize(buffer);
        buffer.extend_from_slice(request);
        Some(MsgId(0))
    }

    fn finalize(&mut self, buffer: &mut Vec<u8>) -> Option<MsgId> {
        if buffer.is_empty() {
            None
        } else {
            Some(MsgId(0))
        }
    }

    /// Validates that the returned data is a correct plain message, and
    /// if it is, returns the inner contents of the message as the result.
    fn deserialize(&mut self, payload: &[u8]) -> Result<Vec<Deserialization>, DeserializeError> {
        if payload.len() < PLAIN_HEADER_LEN {
            return Err(DeserializeError::MessageBufferTooSmall);
        }

        let mut buf = Cursor::from_slice(payload);
        let auth_key_id = i64::deserialize(&mut buf)?;
        if auth_key_id != 0 {
            return Err(DeserializeError::BadAuthKey {
                got: auth_key_id,
                expected: 0,
            });
        }

        // The local clock may be wrong at this point, so the time part is
        // not checked. A response to a client message is always 1 mod 4.
        let msg_id = i64::deserialize(&mut buf)?;
        if msg_id <= 0 || msg_id % 4 != 1 {
            return Err(DeserializeError::BadMessageId { got: msg_id });
        }

        let len = i32::deserialize(&mut buf)?;
        if len <= 0 {
            return Err(DeserializeError::NegativeMessageLength { got: len });
        }
        if PLAIN_HEADER_LEN + len as usize > payload.len() {
            return Err(DeserializeError::TooLongMessageLength {
                got: len as usize,
                max_length: payload.len() - PLAIN_HEADER_LEN,
            });
        }

        Ok(vec![Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(0),
            body: payload[PLAIN_HEADER_LEN..PLAIN_HEADER_LEN + len as usize].to_vec(),
        })])
    }

    fn reset(&mut self) {
        self.last_msg_id = 0;
    }
}

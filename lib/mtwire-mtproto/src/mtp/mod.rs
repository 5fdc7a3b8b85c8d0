// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of the [Mobile Transport Protocol]. This layer is
//! responsible for converting zero or more input requests into outgoing
//! messages, and to process the response.
//!
//! A distinction between plain and encrypted is made for simplicity (the
//! plain hardly requires to process any state) and to help prevent invalid
//! states (encrypted communication cannot be made without an authorization
//! key).
//!
//! [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description
mod encrypted;
mod plain;

use crate::MsgId;
use crate::tl;
pub use encrypted::{Builder, Encrypted, RECENT_INBOUND_LEN};
pub use plain::Plain;
use std::fmt;

/// The result of a call, still serialized.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub msg_id: MsgId,
    pub body: Vec<u8>,
}

/// The server answered a call with an error.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResultError {
    pub msg_id: MsgId,
    pub error: tl::types::RpcError,
}

/// The server refused one of our messages (or a container of them).
///
/// By the time this is produced, whatever local state caused it has
/// already been corrected.
#[derive(Clone, Debug, PartialEq)]
pub struct BadMessage {
    pub msg_id: MsgId,
    pub code: i32,
}

/// A result arrived but could not be understood.
#[derive(Clone, Debug, PartialEq)]
pub struct DeserializationFailure {
    pub msg_id: MsgId,
    pub error: DeserializeError,
}

/// Results from the deserialization of a response.
#[derive(Clone, Debug, PartialEq)]
pub enum Deserialization {
    /// An unsolicited message for the layers above.
    Update(Vec<u8>),
    RpcResult(RpcResult),
    RpcError(RpcResultError),
    BadMessage(BadMessage),
    Failure(DeserializationFailure),
    /// The server started a new session. Messages older than `first_msg_id`
    /// never reached it.
    NewSession { first_msg_id: MsgId },
    /// The server acknowledged a message without answering it (yet).
    Acknowledged(MsgId),
    /// The server has the answer to `msg_id` ready as `answer_msg_id`.
    DetailedInfo { msg_id: MsgId, answer_msg_id: MsgId },
}

impl BadMessage {
    pub fn description(&self) -> &'static str {
        // https://core.telegram.org/mtproto/service_messages_about_messages
        match self.code {
            16 => "msg_id too low",
            17 => "msg_id too high",
            18 => "incorrect two lower order msg_id bits; this is a bug",
            19 => "container msg_id is the same as msg_id of a previously received message; this is a bug",
            20 => "message too old",
            32 => "msg_seqno too low",
            33 => "msg_seqno too high",
            34 => "an even msg_seqno expected; this may be a bug",
            35 => "odd msg_seqno expected; this may be a bug",
            48 => "incorrect server salt",
            64 => "invalid container; this is likely a bug",
            _ => "unknown explanation",
        }
    }

    /// Whether the message should simply be sent again.
    pub fn retryable(&self) -> bool {
        [16, 17, 32, 33, 48].contains(&self.code)
    }
}

/// The error type for the deserialization of server messages.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// The server's authorization key did not match our expectations.
    BadAuthKey { got: i64, expected: i64 },

    /// The server's message ID did not match our expectations.
    BadMessageId { got: i64 },

    /// The server's message length was not strictly positive.
    NegativeMessageLength { got: i32 },

    /// The server's message length was past the buffer.
    TooLongMessageLength { got: usize, max_length: usize },

    /// The received buffer is too small to contain a valid response message,
    /// or the response seemed valid at first but trying to deserialize it
    /// proved the buffer to be too small.
    MessageBufferTooSmall,

    /// The server responded with compressed data which we failed to decompress.
    DecompressionFailed,

    /// While deserializing the response types one of them had a constructor
    /// that did not match our expectations.
    UnexpectedConstructor { id: u32 },
}

impl std::error::Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BadAuthKey { got, expected } => {
                write!(f, "bad server auth key (got {got}, expected {expected})")
            }
            Self::BadMessageId { got } => write!(f, "bad server message id (got {got})"),
            Self::NegativeMessageLength { got } => {
                write!(f, "bad server message length (got {got})")
            }
            Self::TooLongMessageLength { got, max_length } => write!(
                f,
                "bad server message length (got {got}, when at most it should be {max_length})"
            ),
            Self::MessageBufferTooSmall => write!(
                f,
                "server responded with a payload that's too small to fit a valid message"
            ),
            Self::DecompressionFailed => write!(f, "failed to decompress server's data"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {id:08x}"),
        }
    }
}

impl From<tl::Error> for DeserializeError {
    fn from(error: tl::Error) -> Self {
        match error {
            tl::Error::UnexpectedEof => Self::MessageBufferTooSmall,
            tl::Error::UnexpectedConstructor { id } => Self::UnexpectedConstructor { id },
        }
    }
}

/// The trait used by the [Mobile Transport Protocol] to serialize outgoing
/// messages and deserialize incoming ones into proper responses.
///
/// [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description
pub trait Mtp {
    /// Serializes one request to the input buffer.
    /// The same buffer should be used until `finalize` is called.
    ///
    /// Returns the message ID assigned the request if it was serialized, or
    /// `None` if the buffer is full and cannot hold more requests.
    ///
    /// Panics if the body is not padded to 4 bytes.
    fn push(&mut self, buffer: &mut Vec<u8>, request: &[u8]) -> Option<MsgId>;

    /// Turns the pushed requests into a single payload ready for the
    /// transport, replacing the contents of `buffer`.
    ///
    /// The protocol may have messages of its own to send even if nothing
    /// was pushed. The buffer is left empty if there is nothing to send.
    ///
    /// Returns the identifier of the outermost message: the container, if
    /// one was needed, or the only message otherwise.
    fn finalize(&mut self, buffer: &mut Vec<u8>) -> Option<MsgId>;

    /// Deserializes a single incoming payload into zero or more responses.
    fn deserialize(&mut self, payload: &[u8]) -> Result<Vec<Deserialization>, DeserializeError>;

    /// Reset the state, as if a new instance was just created.
    fn reset(&mut self);

    /// Queues an acknowledgement for a message the server sent.
    ///
    /// Plain messages are never acknowledged, so by default this does nothing.
    fn ack(&mut self, _msg_id: MsgId) {}

    /// Asks the server to send the message `msg_id` again.
    fn request_resend(&mut self, _msg_id: MsgId) {}

    /// Whether acknowledgements are waiting to be sent.
    fn has_pending_acks(&self) -> bool {
        false
    }

    /// Whether there are service messages that should go out right away.
    fn has_pending_replies(&self) -> bool {
        false
    }
}

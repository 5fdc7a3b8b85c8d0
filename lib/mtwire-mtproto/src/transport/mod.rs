// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of the several [MTProto transports]. These frame the
//! payloads produced by [`crate::mtp`] before they are written to the
//! stream, and split the stream back into payloads.
//!
//! [MTProto transports]: https://core.telegram.org/mtproto#mtproto-transport
mod full;
mod intermediate;
mod obfuscated;

use bytes::BytesMut;
pub use full::Full;
pub use intermediate::Intermediate;
pub use obfuscated::Obfuscated;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes are provided.
    MissingBytes,

    /// The length is either too short or too long to represent a valid packet.
    BadLen { got: u32 },

    /// The sequence number received does not match the expected value.
    BadSeq { expected: u32, got: u32 },

    /// The checksum of the packet does not match its expected value.
    BadCrc { expected: u32, got: u32 },

    /// A [transport-level error] was received instead of a payload.
    /// The code behaves like an [HTTP status code]:
    ///
    /// * 404, if the authorization key used was not found, meaning that the
    ///   server is not aware of the key used by the client, so it cannot be
    ///   used to securely communicate with it.
    ///
    /// * 429, if too many transport connections are established to the same
    ///   IP address in a too-short lapse of time.
    ///
    /// [transport-level error]: https://core.telegram.org/mtproto/mtproto-transports#transport-errors
    /// [HTTP status code]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Status
    BadStatus { status: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: ")?;
        match self {
            Error::MissingBytes => write!(f, "need more bytes"),
            Error::BadLen { got } => write!(f, "bad len (got {got})"),
            Error::BadSeq { expected, got } => {
                write!(f, "bad seq (expected {expected}, got {got})")
            }
            Error::BadCrc { expected, got } => {
                write!(f, "bad crc (expected {expected}, got {got})")
            }
            Error::BadStatus { status } => write!(f, "bad status (code {status})"),
        }
    }
}

pub trait Transport {
    /// Packs the input buffer into the output buffer.
    ///
    /// Panics if `input.len()` is not divisible by 4.
    fn pack(&mut self, input: &[u8], output: &mut BytesMut);

    /// Unpacks the first payload found in the input buffer into the output
    /// buffer, returning how many bytes of the input it spanned.
    ///
    /// Subsequent calls should be made with those bytes removed from the
    /// front of the input.
    fn unpack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<usize, Error>;

    /// Reset the state, as if a new instance was just created.
    fn reset(&mut self);
}

pub trait Tagged {
    /// Gets the transport tag for use in the obfuscated transport and
    /// changes the internal state to avoid sending the tag again.
    fn init_tag(&mut self) -> [u8; 4];
}

/// A payload made of a single negative integer is a transport error code.
fn check_status(payload: &[u8]) -> Result<(), Error> {
    if let Ok(bytes) = <[u8; 4]>::try_from(payload) {
        let code = i32::from_le_bytes(bytes);
        if code < 0 {
            return Err(Error::BadStatus {
                status: code.unsigned_abs(),
            });
        }
    }
    Ok(())
}

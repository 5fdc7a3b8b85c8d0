// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A sans-IO implementation of [MTProto 2.0].
//!
//! * [`authentication`] runs the key exchange step by step.
//! * [`session`] turns an authorization key into encrypt/decrypt operations.
//! * [`mtp`] keeps the per-session bookkeeping: message identifiers,
//!   sequence numbers, acknowledgements and the reaction to service messages.
//! * [`transport`] frames payloads for a byte stream.
//!
//! None of the types here perform any I/O. Driving them over a socket is
//! the job of a sender built on top.
//!
//! [MTProto 2.0]: https://core.telegram.org/mtproto
#![deny(unsafe_code)]

pub mod authentication;
pub mod mtp;
pub mod session;
pub mod tl;
pub mod transport;
mod utils;

/// The default compression threshold to be used.
pub const DEFAULT_COMPRESSION_THRESHOLD: Option<usize> = Some(512);

/// The identifier of a message within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgId(pub i64);

impl MsgId {
    /// Server-sent identifiers are always odd; even ones belong to clients.
    pub fn is_from_server(self) -> bool {
        self.0 & 1 == 1
    }
}

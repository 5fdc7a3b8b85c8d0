// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [encrypted envelope] every message travels in once a key exists.
//!
//! ```text
//! auth_key_id (8) | msg_key (16) | AES-IGE(
//!     salt (8) | session_id (8) | msg_id (8) | seq_no (4) | len (4) | body | padding
//! )
//! ```
//!
//! [encrypted envelope]: https://core.telegram.org/mtproto/description#encrypted-message
use crate::utils;
use log::{debug, trace};
use mtwire_crypto::{AuthKey, Side};

/// Bytes in front of the body inside the encrypted data.
pub const INNER_HEADER_LEN: usize = 32;

/// Bytes in front of the ciphertext.
pub const OUTER_HEADER_LEN: usize = 24;

const MIN_PADDING: usize = 12;
const MAX_PADDING: usize = 1024;

/// A message that passed every check of [`Session::decrypt`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedMessage {
    pub salt: i64,
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

/// Owns the authorization key of one connection, its random session
/// identifier and the current server salt.
pub struct Session {
    auth_key: Option<AuthKey>,
    side: Side,
    session_id: i64,
    salt: i64,
}

impl Session {
    /// A session that is not authorized yet.
    pub fn new(side: Side) -> Self {
        Self {
            auth_key: None,
            side,
            session_id: utils::random_i64(),
            salt: 0,
        }
    }

    pub fn with_key(auth_key: AuthKey, side: Side) -> Self {
        let mut session = Self::new(side);
        session.setup(auth_key);
        session
    }

    /// Starts using `auth_key` for every message.
    pub fn setup(&mut self, auth_key: AuthKey) {
        debug!("session {:016x} using {:?}", self.session_id, auth_key);
        self.auth_key = Some(auth_key);
    }

    /// Forgets the key and starts a new session. The salt is kept.
    pub fn reset(&mut self) {
        self.auth_key = None;
        self.session_id = utils::random_i64();
        debug!("session reset, new id {:016x}", self.session_id);
    }

    pub fn is_ready(&self) -> bool {
        self.auth_key.is_some()
    }

    pub fn auth_key(&self) -> Option<&AuthKey> {
        self.auth_key.as_ref()
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Pins the session identifier. Only a peer mirroring a client needs this.
    pub fn set_session_id(&mut self, session_id: i64) {
        self.session_id = session_id;
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    /// Wraps `body` in the encrypted envelope.
    ///
    /// Returns `None` if the session has no key. The body length must be a
    /// multiple of 4.
    pub fn encrypt(&self, body: &[u8], msg_id: i64, seq_no: i32) -> Option<Vec<u8>> {
        let auth_key = self.auth_key.as_ref()?;
        assert_eq!(body.len() % 4, 0, "message bodies are padded to 4 bytes");

        let mut inner = Vec::with_capacity(INNER_HEADER_LEN + body.len() + 28);
        inner.extend(self.salt.to_le_bytes());
        inner.extend(self.session_id.to_le_bytes());
        inner.extend(msg_id.to_le_bytes());
        inner.extend(seq_no.to_le_bytes());
        inner.extend((body.len() as i32).to_le_bytes());
        inner.extend(body);

        trace!("encrypting {} bytes for msg_id {}", inner.len(), msg_id);
        Some(mtwire_crypto::encrypt_data_v2(&inner, auth_key, self.side))
    }

    /// Opens an envelope produced by the other side.
    ///
    /// Anything that does not check out yields `None`: garbage is expected
    /// from broken transports and must not bring the connection down.
    /// Trailing bytes beyond a multiple of 16 are ignored.
    pub fn decrypt(&self, frame: &[u8]) -> Option<DecryptedMessage> {
        let auth_key = self.auth_key.as_ref()?;

        if frame.len() < OUTER_HEADER_LEN + INNER_HEADER_LEN + MIN_PADDING {
            debug!("rejecting frame of {} bytes: too short", frame.len());
            return None;
        }
        let usable = frame.len() - (frame.len() - OUTER_HEADER_LEN) % 16;

        let inner = match mtwire_crypto::decrypt_data_v2(&frame[..usable], auth_key, self.side.peer()) {
            Ok(inner) => inner,
            Err(e) => {
                debug!("rejecting frame: {e}");
                return None;
            }
        };

        let read_i64 = |at: usize| i64::from_le_bytes(inner[at..at + 8].try_into().unwrap_or_default());
        let read_i32 = |at: usize| i32::from_le_bytes(inner[at..at + 4].try_into().unwrap_or_default());

        let salt = read_i64(0);
        let session_id = read_i64(8);
        let msg_id = read_i64(16);
        let seq_no = read_i32(24);
        let len = read_i32(28);

        if session_id != self.session_id {
            debug!(
                "rejecting frame: session {session_id:016x} is not ours ({:016x})",
                self.session_id
            );
            return None;
        }

        let available = inner.len() - INNER_HEADER_LEN;
        if len < 0 || len as usize > available || len % 4 != 0 {
            debug!("rejecting frame: bad body length {len} with {available} bytes available");
            return None;
        }

        let padding = available - len as usize;
        if !(MIN_PADDING..=MAX_PADDING).contains(&padding) {
            debug!("rejecting frame: {padding} bytes of padding");
            return None;
        }

        let body = inner[INNER_HEADER_LEN..INNER_HEADER_LEN + len as usize].to_vec();
        Some(DecryptedMessage {
            salt,
            msg_id,
            seq_no,
            body,
        })
    }
}

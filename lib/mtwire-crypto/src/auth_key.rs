// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::sha1;
use std::fmt;

/// A 2048-bit [authorization key] shared with the server.
///
/// The identifier and auxiliary hash are derived once on construction.
///
/// [authorization key]: https://core.telegram.org/mtproto/auth_key
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    pub(crate) aux_hash: [u8; 8],
    pub(crate) key_id: [u8; 8],
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}

impl AuthKey {
    /// Wraps raw key material, such as the output of the key exchange or
    /// bytes previously returned by [`AuthKey::to_bytes`].
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(data);
        let mut aux_hash = [0; 8];
        aux_hash.copy_from_slice(&sha[..8]);
        let mut key_id = [0; 8];
        key_id.copy_from_slice(&sha[12..20]);

        Self {
            data,
            aux_hash,
            key_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The last 8 bytes of the key's SHA-1, which identify it on the wire.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The first 8 bytes of the key's SHA-1.
    pub fn aux_hash(&self) -> [u8; 8] {
        self.aux_hash
    }

    /// `sha1(new_nonce ‖ number ‖ aux_hash)[4..20]`, used to confirm the
    /// outcome of the last key exchange step.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let sha = sha1!(new_nonce, [number], self.aux_hash);
        let mut result = [0; 16];
        result.copy_from_slice(&sha[4..]);
        result
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("key_id", &i64::from_le_bytes(self.key_id))
            .finish_non_exhaustive()
    }
}

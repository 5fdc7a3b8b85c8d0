// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::collections::HashMap;
use std::sync::Mutex;

/// Where Authorization Keys are kept between connections.
///
/// Keys are opaque 256-byte blobs, one per datacenter.
pub trait Storage: Send + Sync {
    fn auth_key(&self, dc_id: i32) -> Option<[u8; 256]>;

    /// Stores a new key for `dc_id`, or forgets it if `None`.
    fn set_auth_key(&self, dc_id: i32, auth_key: Option<[u8; 256]>);
}

/// Keeps keys in memory only, for as long as the value lives.
#[derive(Default)]
pub struct MemoryStorage {
    keys: Mutex<HashMap<i32, [u8; 256]>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn auth_key(&self, dc_id: i32) -> Option<[u8; 256]> {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&dc_id)
            .copied()
    }

    fn set_auth_key(&self, dc_id: i32, auth_key: Option<[u8; 256]>) {
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match auth_key {
            Some(key) => keys.insert(dc_id, key),
            None => keys.remove(&dc_id),
        };
    }
}

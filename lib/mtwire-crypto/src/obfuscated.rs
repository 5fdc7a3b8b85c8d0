// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![allow(deprecated)] // generic_array 0.14 is what aes 0.8 exposes

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};

type Ctr = ctr::Ctr128BE<Aes256>;

/// The pair of AES-256-CTR streams used by the obfuscated transport.
///
/// Both streams are keyed from the random 64-byte header that opens the
/// connection: the sending stream reads it forwards, and the receiving
/// stream reads it backwards.
pub struct ObfuscatedCipher {
    rx: Ctr,
    tx: Ctr,
}

fn stream(material: &[u8]) -> Ctr {
    Ctr::new(
        GenericArray::from_slice(&material[8..40]),
        GenericArray::from_slice(&material[40..56]),
    )
}

impl ObfuscatedCipher {
    /// Keys the sending side from `init` as a client would.
    pub fn new(init: &[u8; 64]) -> Self {
        let reversed: Vec<u8> = init.iter().rev().copied().collect();
        Self {
            rx: stream(&reversed),
            tx: stream(init),
        }
    }

    /// Keys the streams the way the server would, so that it can read what
    /// a client built with the same `init` writes.
    pub fn new_server(init: &[u8; 64]) -> Self {
        let reversed: Vec<u8> = init.iter().rev().copied().collect();
        Self {
            rx: stream(init),
            tx: stream(&reversed),
        }
    }

    pub fn encrypt(&mut self, buffer: &mut [u8]) {
        self.tx.apply_keystream(buffer);
    }

    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.rx.apply_keystream(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_understand_each_other() {
        let mut init = [0u8; 64];
        init.iter_mut()
            .enumerate()
            .for_each(|(i, x)| *x = (i * 7) as u8);

        let mut client = ObfuscatedCipher::new(&init);
        let mut server = ObfuscatedCipher::new_server(&init);

        let mut data = b"sixteen bytes!!!".to_vec();
        client.encrypt(&mut data);
        assert_ne!(&data[..], b"sixteen bytes!!!");
        server.decrypt(&mut data);
        assert_eq!(&data[..], b"sixteen bytes!!!");

        let mut reply = b"ok".to_vec();
        server.encrypt(&mut reply);
        client.decrypt(&mut reply);
        assert_eq!(&reply[..], b"ok");
    }
}

// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport};
use bytes::{Buf, BufMut, BytesMut};
use log::debug;
use mtwire_crypto::obfuscated::ObfuscatedCipher;

/// Initial bytes that must never open an obfuscated connection, because
/// they would be mistaken for some other protocol.
const FORBIDDEN_FIRST_INTS: [[u8; 4]; 7] = [
    [b'H', b'E', b'A', b'D'], // HTTP HEAD
    [b'P', b'O', b'S', b'T'], // HTTP POST
    [b'G', b'E', b'T', b' '], // HTTP GET
    [b'O', b'P', b'T', b'I'], // HTTP OPTIONS
    [0x16, 0x03, 0x01, 0x02], // TLS handshake
    [0xdd, 0xdd, 0xdd, 0xdd], // Padded Intermediate
    [0xee, 0xee, 0xee, 0xee], // Intermediate
];

/// An [obfuscation] layer over any tagged transport.
///
/// The connection opens with 64 random bytes from which both AES-256-CTR
/// streams are derived. Everything after them, the inner transport's tag
/// included, goes through the stream cipher.
///
/// [obfuscation]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
pub struct Obfuscated<T: Transport + Tagged> {
    inner: T,
    head: Option<[u8; 64]>,
    cipher: ObfuscatedCipher,
    decrypted: BytesMut,
    decrypt_tail: usize,
}

fn acceptable_init(init: &[u8; 64]) -> bool {
    init[4..8] != [0; 4] // Full
        && init[0] != 0xef // Abridged
        && !FORBIDDEN_FIRST_INTS.iter().any(|start| start == &init[..4])
}

impl<T: Transport + Tagged> Obfuscated<T> {
    fn generate_keys(inner: &mut T) -> ([u8; 64], ObfuscatedCipher) {
        let mut init = [0; 64];
        while !acceptable_init(&init) {
            getrandom::fill(&mut init).expect("failed to generate secure random data");
        }

        init[56..60].copy_from_slice(&inner.init_tag());

        let mut cipher = ObfuscatedCipher::new(&init);

        let mut encrypted_init = init;
        cipher.encrypt(&mut encrypted_init);
        init[56..64].copy_from_slice(&encrypted_init[56..64]);

        (init, cipher)
    }

    pub fn new(mut inner: T) -> Self {
        let (init, cipher) = Self::generate_keys(&mut inner);

        Self {
            inner,
            head: Some(init),
            cipher,
            decrypted: BytesMut::new(),
            decrypt_tail: 0,
        }
    }
}

impl<T: Transport + Tagged> Transport for Obfuscated<T> {
    fn pack(&mut self, input: &[u8], output: &mut BytesMut) {
        if let Some(head) = self.head.take() {
            output.put_slice(&head);
        }

        let start = output.len();
        self.inner.pack(input, output);
        self.cipher.encrypt(&mut output[start..]);
    }

    fn unpack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<usize, Error> {
        // The stream cipher can only advance, so every input byte is
        // decrypted exactly once and kept until the inner transport uses it.
        assert!(
            input.len() >= self.decrypt_tail,
            "input is smaller than what was decrypted"
        );

        let start = self.decrypted.len();
        self.decrypted.extend_from_slice(&input[self.decrypt_tail..]);
        self.cipher.decrypt(&mut self.decrypted[start..]);
        self.decrypt_tail = input.len();

        let len = self.inner.unpack(&self.decrypted, output)?;
        self.decrypted.advance(len);
        self.decrypt_tail -= len;
        Ok(len)
    }

    fn reset(&mut self) {
        self.inner.reset();
        debug!("regenerating keys for obfuscated transport");

        let (init, cipher) = Self::generate_keys(&mut self.inner);
        self.head = Some(init);
        self.cipher = cipher;
        self.decrypted.clear();
        self.decrypt_tail = 0;
    }
}

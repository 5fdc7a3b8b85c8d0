// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! AES-256 in Infinite Garble Extension mode, operating in-place.
//!
//! Both halves of the 32-byte IV are chained: the first with the previous
//! ciphertext block and the second with the previous plaintext block.

#![allow(deprecated)] // generic_array 0.14 is what aes 0.8 exposes

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

fn split_iv(iv: &[u8; 32]) -> ([u8; 16], [u8; 16]) {
    let mut first = [0; 16];
    let mut second = [0; 16];
    first.copy_from_slice(&iv[..16]);
    second.copy_from_slice(&iv[16..]);
    (first, second)
}

fn xor_in_place(block: &mut [u8], other: &[u8; 16]) {
    block.iter_mut().zip(other).for_each(|(b, o)| *b ^= o);
}

/// Encrypt `buffer` in-place. Its length must be a multiple of 16.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0);

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);
    let mut plain = [0; 16];

    for block in buffer.chunks_exact_mut(16) {
        plain.copy_from_slice(block);

        xor_in_place(block, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        xor_in_place(block, &prev_plain);

        prev_cipher.copy_from_slice(block);
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in-place. Its length must be a multiple of 16.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0);

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);
    let mut encrypted = [0; 16];

    for block in buffer.chunks_exact_mut(16) {
        encrypted.copy_from_slice(block);

        xor_in_place(block, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        xor_in_place(block, &prev_cipher);

        prev_plain.copy_from_slice(block);
        prev_cipher = encrypted;
    }
}

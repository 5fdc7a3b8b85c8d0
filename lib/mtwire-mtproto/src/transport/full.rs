// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, check_status};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// The basic MTProto transport protocol. This is an implementation of the
/// [full transport].
///
/// * Overhead: medium
/// * Minimum envelope length: 12 bytes.
/// * Maximum envelope length: 12 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----+----...----+----+
/// | len| seq|  payload  | crc|
/// +----+----+----...----+----+
///  ^^^^ 4 bytes
/// ```
///
/// [full transport]: https://core.telegram.org/mtproto/mtproto-transports#full
pub struct Full {
    send_seq: u32,
    recv_seq: u32,
}

#[allow(clippy::new_without_default)]
impl Full {
    pub fn new() -> Self {
        Self {
            send_seq: 0,
            recv_seq: 0,
        }
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

impl Transport for Full {
    fn pack(&mut self, input: &[u8], output: &mut BytesMut) {
        assert_eq!(input.len() % 4, 0);

        // payload len + length itself (4 bytes) + send counter (4 bytes) + crc32 (4 bytes)
        let len = input.len() + 4 + 4 + 4;
        output.reserve(len);

        let buf_start = output.len();
        output.put_u32_le(len as _);
        output.put_u32_le(self.send_seq);
        output.put(input);
        let crc = crc32(&output[buf_start..]);
        output.put_u32_le(crc);

        self.send_seq += 1;
    }

    fn unpack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<usize, Error> {
        // Need 4 bytes for the initial length
        if input.len() < 4 {
            return Err(Error::MissingBytes);
        }

        // A bare negative length is the server reporting an error
        check_status(&input[..4])?;

        let total_len = input.len();
        let needle = &mut &input[..];

        let len = needle.get_u32_le() as usize;
        if len < 12 {
            return Err(Error::BadLen { got: len as u32 });
        }

        if total_len < len {
            return Err(Error::MissingBytes);
        }

        let seq = needle.get_u32_le();
        if seq != self.recv_seq {
            return Err(Error::BadSeq {
                expected: self.recv_seq,
                got: seq,
            });
        }

        // skip payload for now
        needle.advance(len - 12);

        let crc = needle.get_u32_le();
        let valid_crc = crc32(&input[..len - 4]);
        if crc != valid_crc {
            return Err(Error::BadCrc {
                expected: valid_crc,
                got: crc,
            });
        }

        self.recv_seq += 1;
        let payload = &input[8..len - 4];
        check_status(payload)?;
        output.extend_from_slice(payload);
        Ok(len)
    }

    fn reset(&mut self) {
        self.send_seq = 0;
        self.recv_seq = 0;
    }
}

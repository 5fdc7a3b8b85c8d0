// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, check_status};
use bytes::{BufMut, BytesMut};

const TAG: [u8; 4] = [0xee, 0xee, 0xee, 0xee];

/// A light MTProto transport protocol available that guarantees data padded
/// to 4 bytes. This is an implementation of the [intermediate transport].
///
/// * Overhead: small.
/// * Minimum envelope length: 4 bytes.
/// * Maximum envelope length: 4 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// The very first packet is preceded by the `0xeeeeeeee` tag.
///
/// [intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
pub struct Intermediate {
    init: bool,
}

#[allow(clippy::new_without_default)]
impl Intermediate {
    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for Intermediate {
    fn pack(&mut self, input: &[u8], output: &mut BytesMut) {
        assert_eq!(input.len() % 4, 0);

        if !self.init {
            output.put_slice(&TAG);
            self.init = true;
        }

        output.reserve(4 + input.len());
        output.put_u32_le(input.len() as _);
        output.put(input);
    }

    fn unpack(&mut self, input: &[u8], output: &mut BytesMut) -> Result<usize, Error> {
        if input.len() < 4 {
            return Err(Error::MissingBytes);
        }

        check_status(&input[..4])?;
        let len = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
        if len < 4 {
            return Err(Error::BadLen { got: len as u32 });
        }

        if input.len() < 4 + len {
            return Err(Error::MissingBytes);
        }

        let payload = &input[4..4 + len];
        check_status(payload)?;
        output.extend_from_slice(payload);
        Ok(4 + len)
    }

    fn reset(&mut self) {
        self.init = false;
    }
}

impl Tagged for Intermediate {
    fn init_tag(&mut self) -> [u8; 4] {
        self.init = true;
        TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new intermediate transport, `n` bytes of input data for it, and an empty output buffer.
    fn setup_pack(n: u32) -> (Intermediate, Vec<u8>, BytesMut) {
        let input = (0..n).map(|x| (x & 0xff) as u8).collect();
        (Intermediate::new(), input, BytesMut::new())
    }

    #[test]
    fn pack_empty() {
        let (mut transport, input, mut output) = setup_pack(0);
        transport.pack(&input, &mut output);
        assert_eq!(&output[..], &[0xee, 0xee, 0xee, 0xee, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn pack_non_padded() {
        let (mut transport, input, mut output) = setup_pack(7);
        transport.pack(&input, &mut output);
    }

    #[test]
    fn pack_normal() {
        let (mut transport, input, mut output) = setup_pack(128);
        transport.pack(&input, &mut output);
        assert_eq!(&output[..8], &[0xee, 0xee, 0xee, 0xee, 128, 0, 0, 0]);
        assert_eq!(&output[8..], &input[..]);

        output.clear();
        transport.pack(&input, &mut output);
        assert_eq!(&output[..4], &[128, 0, 0, 0]);
    }

    #[test]
    fn tag_is_sent_once_when_taken() {
        let (mut transport, input, mut output) = setup_pack(4);
        assert_eq!(transport.init_tag(), TAG);
        transport.pack(&input, &mut output);
        assert_eq!(&output[..], &[4, 0, 0, 0, 0, 1, 2, 3]);

        transport.reset();
        output.clear();
        transport.pack(&input, &mut output);
        assert_eq!(&output[..4], &TAG);
    }

    #[test]
    fn unpack_small() {
        let mut transport = Intermediate::new();
        let mut output = BytesMut::new();
        assert_eq!(transport.unpack(&[1], &mut output), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_two_at_once() {
        let (mut transport, input, mut packed) = setup_pack(128);
        transport.pack(&input, &mut packed);
        let packed = packed.split_off(4); // init bytes
        let mut two = packed.clone();
        two.extend_from_slice(&packed);

        let mut output = BytesMut::new();
        assert_eq!(transport.unpack(&two, &mut output), Ok(packed.len()));
        assert_eq!(output, input);

        output.clear();
        assert_eq!(
            transport.unpack(&two[packed.len()..], &mut output),
            Ok(packed.len())
        );
        assert_eq!(output, input);
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Intermediate::new();
        let mut output = BytesMut::new();

        let mut input = Vec::new();
        input.extend((4_i32).to_le_bytes());
        input.extend((-404_i32).to_le_bytes());
        assert_eq!(
            transport.unpack(&input, &mut output),
            Err(Error::BadStatus { status: 404 })
        );

        assert_eq!(
            transport.unpack(&(-429_i32).to_le_bytes(), &mut output),
            Err(Error::BadStatus { status: 429 })
        );
    }
}

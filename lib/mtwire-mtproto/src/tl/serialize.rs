// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{BOOL_FALSE, BOOL_TRUE, RawVec, VECTOR};

/// Types that can be written in their binary [TL representation].
///
/// [TL representation]: https://core.telegram.org/mtproto/serialize
pub trait Serializable {
    fn serialize(&self, buf: &mut impl Extend<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.serialize(&mut buffer);
        buffer
    }
}

impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id = if *self { BOOL_TRUE } else { BOOL_FALSE };
        id.serialize(buf)
    }
}

impl Serializable for i32 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

impl Serializable for u32 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

impl Serializable for i64 {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.to_le_bytes())
    }
}

/// `int128`
impl Serializable for [u8; 16] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied())
    }
}

/// `int256`
impl Serializable for [u8; 32] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied())
    }
}

/// Boxed `Vector<T>`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR.serialize(buf);
        RawVec::serialize_items(self, buf);
    }
}

/// Bare `vector<T>`.
impl<T: Serializable> Serializable for RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::serialize_items(&self.0, buf);
    }
}

impl<T: Serializable> RawVec<T> {
    fn serialize_items(items: &[T], buf: &mut impl Extend<u8>) {
        (items.len() as i32).serialize(buf);
        items.iter().for_each(|x| x.serialize(buf));
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf)
    }
}

/// `bytes`
impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf)
    }
}

/// `bytes`: a length prefix of one byte (or `254` followed by three
/// bytes for long values), the data, then zeros up to a multiple of 4.
impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = self.len();
        let header = if len < 254 {
            buf.extend([len as u8]);
            1
        } else {
            buf.extend([254, (len & 0xff) as u8, ((len >> 8) & 0xff) as u8, ((len >> 16) & 0xff) as u8]);
            4
        };

        buf.extend(self.iter().copied());
        let padding = (4 - (header + len) % 4) % 4;
        buf.extend(std::iter::repeat_n(0, padding));
    }
}

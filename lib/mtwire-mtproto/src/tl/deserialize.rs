// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{BOOL_FALSE, BOOL_TRUE, RawVec, VECTOR};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The buffer ended before the value being read was complete.
    UnexpectedEof,

    /// A boxed value started with a constructor other than the expected one.
    UnexpectedConstructor { id: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnexpectedEof => write!(f, "unexpected eof"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {id:08x}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A reading position over an in-memory buffer.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(self.read_exact(N)?);
        Ok(array)
    }

    pub fn read_to_end(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Reads the next constructor without consuming it.
    pub fn peek_id(&self) -> Result<u32> {
        let mut peek = Cursor::from_slice(&self.buf[self.pos..]);
        u32::deserialize(&mut peek)
    }

    /// Consumes a constructor, failing unless it is `expected`.
    pub fn expect_id(&mut self, expected: u32) -> Result<()> {
        let id = u32::deserialize(self)?;
        if id == expected {
            Ok(())
        } else {
            Err(Error::UnexpectedConstructor { id })
        }
    }
}

/// Types that can be read back from their binary TL representation.
pub trait Deserializable: Sized {
    fn deserialize(buf: &mut Cursor) -> Result<Self>;

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::deserialize(&mut Cursor::from_slice(buf))
    }
}

impl Deserializable for bool {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        match u32::deserialize(buf)? {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl Deserializable for i32 {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        Ok(i32::from_le_bytes(buf.read_array()?))
    }
}

impl Deserializable for u32 {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        Ok(u32::from_le_bytes(buf.read_array()?))
    }
}

impl Deserializable for i64 {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        Ok(i64::from_le_bytes(buf.read_array()?))
    }
}

impl Deserializable for [u8; 16] {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.read_array()
    }
}

impl Deserializable for [u8; 32] {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.read_array()
    }
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(VECTOR)?;
        Ok(RawVec::<T>::deserialize(buf)?.0)
    }
}

impl<T: Deserializable> Deserializable for RawVec<T> {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let len = u32::deserialize(buf)? as usize;
        // Every item takes at least four bytes.
        if len > buf.remaining() / 4 {
            return Err(Error::UnexpectedEof);
        }
        (0..len)
            .map(|_| T::deserialize(buf))
            .collect::<Result<Vec<_>>>()
            .map(RawVec)
    }
}

impl Deserializable for String {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let bytes = Vec::<u8>::deserialize(buf)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let first = buf.read_exact(1)?[0];
        let (header, len) = if first == 254 {
            let len = buf.read_exact(3)?;
            (4, len[0] as usize | (len[1] as usize) << 8 | (len[2] as usize) << 16)
        } else {
            (1, first as usize)
        };

        let data = buf.read_exact(len)?.to_vec();
        buf.read_exact((4 - (header + len) % 4) % 4)?;
        Ok(data)
    }
}

// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The subset of the [Type Language] schema that the protocol itself
//! speaks: the key exchange records and the service messages.
//!
//! Business methods are not modelled here. Callers hand over already
//! serialized requests and receive raw response bodies.
//!
//! [Type Language]: https://core.telegram.org/mtproto/TL

/// Declares a record with a constructor identifier and fields that are
/// written and read in declaration order.
macro_rules! tl_record {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal { $( $field:ident : $ty:ty ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( pub $field: $ty, )*
        }

        impl $crate::tl::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl $crate::tl::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                <Self as $crate::tl::Identifiable>::CONSTRUCTOR_ID.serialize(buf);
                $( self.$field.serialize(buf); )*
            }
        }

        impl $crate::tl::Deserializable for $name {
            fn deserialize(buf: &mut $crate::tl::Cursor) -> $crate::tl::Result<Self> {
                buf.expect_id(<Self as $crate::tl::Identifiable>::CONSTRUCTOR_ID)?;
                Self::deserialize_bare(buf)
            }
        }

        impl $name {
            /// Reads the fields without a leading constructor identifier.
            #[allow(unused_variables)]
            pub fn deserialize_bare(buf: &mut $crate::tl::Cursor) -> $crate::tl::Result<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::tl::Deserializable>::deserialize(buf)?, )*
                })
            }
        }
    };
}

/// Declares a boxed type made of several records, told apart by their
/// constructor identifier.
macro_rules! tl_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $variant:ident($ty:ty) ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl $crate::tl::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => x.serialize(buf), )+
                }
            }
        }

        impl $crate::tl::Deserializable for $name {
            fn deserialize(buf: &mut $crate::tl::Cursor) -> $crate::tl::Result<Self> {
                let id = buf.peek_id()?;
                $(
                    if id == <$ty as $crate::tl::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty>::deserialize(buf)?));
                    }
                )+
                Err($crate::tl::Error::UnexpectedConstructor { id })
            }
        }
    };
}

mod deserialize;
pub mod enums;
pub mod functions;
mod manual;
mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable, Error, Result};
pub use manual::{GzipPacked, Message, MessageContainer, MessageCopy, RpcResult};
pub use serialize::Serializable;

pub(crate) const BOOL_TRUE: u32 = 0x997275b5;
pub(crate) const BOOL_FALSE: u32 = 0xbc799737;
pub(crate) const VECTOR: u32 = 0x1cb5c415;

/// The API layer announced through `invokeWithLayer`.
pub const LAYER: i32 = 214;

/// A bare `vector<T>`, without the boxed constructor prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

pub trait Identifiable {
    const CONSTRUCTOR_ID: u32;
}

/// A function that can be invoked on the remote end.
pub trait RemoteCall: Serializable {
    type Return: Deserializable;
}

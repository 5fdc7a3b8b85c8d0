// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hashing shorthands. The macros hash the concatenation of their
//! arguments without building an intermediate buffer.

#[doc(hidden)]
pub use sha1::Digest;
#[doc(hidden)]
pub use sha1::Sha1;
#[doc(hidden)]
pub use sha2::Sha256;

/// `sha1!(a, b, ...)` returns the 20-byte SHA-1 of `a ‖ b ‖ ...`.
#[macro_export]
macro_rules! sha1 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use $crate::sha::Digest as _;
        let mut hasher = $crate::sha::Sha1::new();
        $( hasher.update($x); )+
        let digest: [u8; 20] = hasher.finalize().into();
        digest
    }};
}

/// `sha256!(a, b, ...)` returns the 32-byte SHA-256 of `a ‖ b ‖ ...`.
#[macro_export]
macro_rules! sha256 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use $crate::sha::Digest as _;
        let mut hasher = $crate::sha::Sha256::new();
        $( hasher.update($x); )+
        let digest: [u8; 32] = hasher.finalize().into();
        digest
    }};
}

// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Validation of the Diffie-Hellman parameters a server hands out during
//! the key exchange, as required by the [security guidelines].
//!
//! [security guidelines]: https://core.telegram.org/mtproto/security_guidelines
use num_bigint::BigUint;
use num_traits::One;
use std::fmt;

/// The prime every production server currently uses. Seeing it spares us
/// the expensive primality tests.
const KNOWN_DH_PRIME: &str = "c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c3720fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f642477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b";

#[derive(Clone, Debug, PartialEq)]
pub enum DhError {
    /// The prime is not exactly 2048 bits long.
    BadPrimeSize { bits: u64 },
    /// Either `p` or `(p - 1) / 2` is not prime.
    NotSafePrime,
    /// The generator is not one of 2, 3, 4, 5, 6 or 7.
    UnsupportedGenerator { g: u32 },
    /// `g` does not generate a cyclic subgroup of prime order `(p - 1) / 2`.
    BadGeneratorResidue { g: u32 },
}

impl std::error::Error for DhError {}

impl fmt::Display for DhError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPrimeSize { bits } => write!(f, "dh prime has {bits} bits instead of 2048"),
            Self::NotSafePrime => write!(f, "dh prime is not a safe prime"),
            Self::UnsupportedGenerator { g } => write!(f, "unsupported dh generator {g}"),
            Self::BadGeneratorResidue { g } => {
                write!(f, "dh prime has the wrong residue for generator {g}")
            }
        }
    }
}

pub fn known_dh_prime() -> BigUint {
    BigUint::parse_bytes(KNOWN_DH_PRIME.as_bytes(), 16).expect("constant is valid hex")
}

/// Checks the quadratic residue condition for `g` modulo `p`.
pub fn check_generator(p: &BigUint, g: u32) -> Result<(), DhError> {
    let rem = |m: u32| (p % m).try_into().unwrap_or(u32::MAX);
    let ok = match g {
        2 => rem(8) == 7,
        3 => rem(3) == 2,
        4 => true,
        5 => matches!(rem(5), 1 | 4),
        6 => matches!(rem(24), 19 | 23),
        7 => matches!(rem(7), 3 | 5 | 6),
        _ => return Err(DhError::UnsupportedGenerator { g }),
    };

    if ok {
        Ok(())
    } else {
        Err(DhError::BadGeneratorResidue { g })
    }
}

/// Validates `p` and `g` as sent in `server_DH_inner_data`.
pub fn check_dh_prime(p: &BigUint, g: u32) -> Result<(), DhError> {
    if *p == known_dh_prime() {
        return check_generator(p, g);
    }

    if p.bits() != 2048 {
        return Err(DhError::BadPrimeSize { bits: p.bits() });
    }

    if !glass_pumpkin::safe_prime::check(p) {
        return Err(DhError::NotSafePrime);
    }

    check_generator(p, g)
}

/// Whether `value` is strictly between 1 and `p - 1`.
pub fn in_group_range(value: &BigUint, p: &BigUint) -> bool {
    let one = BigUint::one();
    if *p <= one {
        return false;
    }
    one < *value && *value < p - &one
}

/// Whether `value` is strictly between `2^(2048-64)` and `p - 2^(2048-64)`,
/// which `g_a` and `g_b` must be to avoid small-subgroup attacks.
pub fn in_safe_range(value: &BigUint, p: &BigUint) -> bool {
    let bound = BigUint::one() << (2048 - 64);
    if *p <= bound {
        return false;
    }
    bound < *value && *value < p - &bound
}

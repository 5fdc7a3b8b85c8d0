// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Contains the steps required to generate an authorization key.
//!
//! # Examples
//!
//! ```no_run
//! use mtwire_mtproto::authentication::{self, Outcome};
//!
//! fn send_data_to_server(request: &[u8]) -> Result<Vec<u8>, authentication::Error> {
//!     unimplemented!()
//! }
//!
//! fn main() -> Result<(), authentication::Error> {
//!     let (request, data) = authentication::step1()?;
//!     let response = send_data_to_server(&request)?;
//!
//!     let (request, data) = authentication::step2(data, &response, Some(2))?;
//!     let response = send_data_to_server(&request)?;
//!
//!     let (mut request, mut data) = authentication::step3(data, &response)?;
//!     let finished = loop {
//!         let response = send_data_to_server(&request)?;
//!         match authentication::create_key(data, &response)? {
//!             Outcome::Finished(finished) => break finished,
//!             Outcome::Retry { request: r, data: d } => (request, data) = (r, d),
//!         }
//!     };
//!     // Now you have a secure `auth_key` to send encrypted messages to server.
//!     let _ = finished.auth_key;
//!     Ok(())
//! }
//! ```
use crate::tl::{self, Cursor, Deserializable, RemoteCall, Serializable};
use crate::utils;
use log::{debug, trace};
use mtwire_crypto::dh::{self, DhError};
use mtwire_crypto::hex;
use mtwire_crypto::{AuthKey, factorize::factorize, rsa, sha1};
use num_bigint::BigUint;
use std::fmt;

/// How many times the server may ask to retry the last step before giving up.
const MAX_DH_GEN_RETRIES: u32 = 5;

/// Represents an error that occurred during the generation of an
/// authorization key.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The response data was invalid and did not match our expectations.
    InvalidResponse { error: tl::Error },

    /// The server's nonce did not match ours.
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },

    /// The server's PQ number was not of the right size.
    InvalidPQSize { size: usize },

    /// The server's PQ number is not the product of two factors.
    InvalidPQ { pq: u64 },

    /// None of the server fingerprints are known to us.
    UnknownFingerprints { fingerprints: Vec<i64> },

    /// The server failed to send the Diffie-Hellman parameters.
    DhParamsFail,

    /// The server's nonce has changed during the key exchange.
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },

    /// The server's `encrypted_data` is not correctly padded.
    EncryptedResponseNotPadded { len: usize },

    /// An error occured while trying to read the DH inner data.
    InvalidDhInnerData { error: tl::Error },

    /// The server's prime or generator are not safe to use.
    InvalidDhPrime { error: DhError },

    /// Some parameter (`g`, `g_a` or `g_b`) was out of range.
    GParameterOutOfRange { name: &'static str, value: BigUint },

    /// The generation of Diffie-Hellman parameters failed.
    DhGenFail,

    /// The server asked to retry the last step too many times.
    DhGenRetryLimit,

    /// The plain text answer hash did not match.
    InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },

    /// The new nonce hash did not match.
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidResponse { error } => write!(f, "invalid server response: {error}"),
            Self::InvalidNonce { got, expected } => {
                write!(f, "invalid nonce: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPQSize { size } => write!(f, "invalid pq size {size}"),
            Self::InvalidPQ { pq } => write!(f, "pq {pq} cannot be factorized"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "all server fingerprints are unknown: {fingerprints:?}")
            }
            Self::DhParamsFail => write!(f, "the generation of DH parameters by the server failed"),
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "invalid server nonce: got {got:?}, expected {expected:?}")
            }
            Self::EncryptedResponseNotPadded { len } => write!(
                f,
                "the encrypted server response was {len} bytes long, which is not correctly padded"
            ),
            Self::InvalidDhInnerData { error } => {
                write!(f, "could not deserialize DH inner data: {error}")
            }
            Self::InvalidDhPrime { error } => write!(f, "unsafe DH parameters: {error}"),
            Self::GParameterOutOfRange { name, value } => {
                write!(f, "the parameter {name} = {value} was out of range")
            }
            Self::DhGenFail => write!(f, "the generation of DH parameters failed"),
            Self::DhGenRetryLimit => {
                write!(f, "the generation of DH parameters was retried too many times")
            }
            Self::InvalidAnswerHash { got, expected } => {
                write!(f, "invalid answer hash: got {got:?}, expected {expected:?}")
            }
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "invalid new nonce hash: got {got:?}, expected {expected:?}")
            }
        }
    }
}

impl From<tl::Error> for Error {
    fn from(error: tl::Error) -> Self {
        Self::InvalidResponse { error }
    }
}

/// A server key we trust, as published by Telegram.
struct PinnedKey {
    fingerprint: i64,
    n: &'static str,
    e: &'static str,
    /// Only used if the server offers no current key.
    old: bool,
}

#[allow(clippy::unreadable_literal)]
static PINNED_KEYS: [PinnedKey; 2] = [
    // Production
    PinnedKey {
        fingerprint: -3414540481677951611,
        n: "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
        e: "65537",
        old: false,
    },
    // Test
    PinnedKey {
        fingerprint: -5595554452916591101,
        n: "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
        e: "65537",
        old: false,
    },
];

/// Picks the key to encrypt with among those the server offered, preferring
/// current keys over old ones.
fn select_key<'a>(table: &'a [PinnedKey], offered: &[i64]) -> Option<&'a PinnedKey> {
    let pick = |old: bool| {
        table
            .iter()
            .filter(|key| key.old == old)
            .find(|key| offered.contains(&key.fingerprint))
    };
    pick(false).or_else(|| pick(true))
}

/// The data generated by [`step1`], needed for [`step2`].
pub struct Step1 {
    nonce: [u8; 16],
}

/// The data generated by [`step2`], needed for [`step3`].
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// Everything agreed with the server that is needed to (re)send
/// `set_client_DH_params`.
struct Exchange {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    key: [u8; 32],
    iv: [u8; 32],
    g: BigUint,
    g_a: BigUint,
    dh_prime: BigUint,
    time_offset: i32,
}

/// The data generated by [`step3`], needed for [`create_key`].
pub struct Step3 {
    exchange: Exchange,
    gab: BigUint,
    retries: u32,
}

/// The final result of a successful key exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key: [u8; 256],
    pub time_offset: i32,
    pub first_salt: i64,
}

/// What [`create_key`] produced.
pub enum Outcome {
    Finished(Finished),
    /// The server wants a different `g_b`. `request` must be sent, and its
    /// response passed to [`create_key`] along with `data`.
    Retry { request: Vec<u8>, data: Step3 },
}

/// The first step of the process to generate an authorization key.
pub fn step1() -> Result<(Vec<u8>, Step1), Error> {
    let random_bytes = utils::random::<16>();
    trace!("auth step 1 random {}", hex::to_hex(&random_bytes));
    do_step1(&random_bytes)
}

// n.b.: the `do_step` functions are pure so that they can be tested.
fn do_step1(random_bytes: &[u8; 16]) -> Result<(Vec<u8>, Step1), Error> {
    // Step 1. Generates a secure random nonce.
    let nonce = *random_bytes;
    Ok((
        tl::functions::ReqPqMulti { nonce }.to_bytes(),
        Step1 { nonce },
    ))
}

/// The second step of the process to generate an authorization key.
///
/// `dc` is the datacenter the key is for, already adjusted for test and
/// media datacenters. Without it, the legacy inner data is used.
pub fn step2(data: Step1, response: &[u8], dc: Option<i32>) -> Result<(Vec<u8>, Step2), Error> {
    trace!("auth step 2 response {}", hex::to_hex(response));
    let random_bytes = utils::random::<{ 32 + 256 }>();
    do_step2(data, response, dc, &random_bytes)
}

/// Big-endian bytes without leading zeros.
fn minimal_be_bytes(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn do_step2(
    data: Step1,
    response: &[u8],
    dc: Option<i32>,
    random_bytes: &[u8; 32 + 256],
) -> Result<(Vec<u8>, Step2), Error> {
    // Step 2. Validate the PQ response. Return `(p, q)` if it's valid.
    let Step1 { nonce } = data;
    let res_pq = <tl::functions::ReqPqMulti as RemoteCall>::Return::from_bytes(response)?;

    check_nonce(&res_pq.nonce, &nonce)?;

    let pinned = select_key(&PINNED_KEYS, &res_pq.server_public_key_fingerprints).ok_or_else(
        || Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        },
    )?;
    debug!(
        "using server key {} (old: {})",
        pinned.fingerprint, pinned.old
    );

    if res_pq.pq.len() != 8 {
        return Err(Error::InvalidPQSize {
            size: res_pq.pq.len(),
        });
    }

    let pq = {
        let mut buffer = [0; 8];
        buffer.copy_from_slice(&res_pq.pq);
        u64::from_be_bytes(buffer)
    };

    let (p, q) = factorize(pq)
        .filter(|&(p, q)| 1 < p && p <= q && p.checked_mul(q) == Some(pq))
        .ok_or(Error::InvalidPQ { pq })?;
    debug!("factorized pq {pq} into {p} * {q}");

    let mut new_nonce = [0; 32];
    new_nonce.copy_from_slice(&random_bytes[..32]);

    let mut rsa_random = [0; 256];
    rsa_random.copy_from_slice(&random_bytes[32..]);

    // Convert (p, q) to bytes using the least amount of space possible.
    // If we don't do this, Telegram will respond with -404 as the message.
    let p_bytes = minimal_be_bytes(p);
    let q_bytes = minimal_be_bytes(q);

    // "pq is a representation of a natural number (in binary big endian format)"
    // https://core.telegram.org/mtproto/auth_key#dh-exchange-initiation
    let pq_inner_data = match dc {
        Some(dc) => tl::types::PQInnerDataDc {
            pq: res_pq.pq.clone(),
            p: p_bytes.clone(),
            q: q_bytes.clone(),
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
            dc,
        }
        .to_bytes(),
        None => tl::types::PQInnerData {
            pq: res_pq.pq.clone(),
            p: p_bytes.clone(),
            q: q_bytes.clone(),
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
        }
        .to_bytes(),
    };

    let key = rsa::Key::new(pinned.n, pinned.e).ok_or(Error::UnknownFingerprints {
        fingerprints: vec![pinned.fingerprint],
    })?;
    let ciphertext = rsa::encrypt_hashed(&pq_inner_data, &key, &rsa_random);

    Ok((
        tl::functions::ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: pinned.fingerprint,
            encrypted_data: ciphertext,
        }
        .to_bytes(),
        Step2 {
            nonce,
            server_nonce: res_pq.server_nonce,
            new_nonce,
        },
    ))
}

/// The third step of the process to generate an authorization key.
pub fn step3(data: Step2, response: &[u8]) -> Result<(Vec<u8>, Step3), Error> {
    trace!("auth step 3 response {}", hex::to_hex(response));
    let random_bytes = utils::random::<{ 256 + 16 }>();
    let now = utils::since_epoch().as_secs() as i32;
    do_step3(data, response, &random_bytes, now)
}

fn do_step3(
    data: Step2,
    response: &[u8],
    random_bytes: &[u8; 256 + 16],
    now: i32,
) -> Result<(Vec<u8>, Step3), Error> {
    let Step2 {
        nonce,
        server_nonce,
        new_nonce,
    } = data;
    let server_dh_params =
        <tl::functions::ReqDhParams as RemoteCall>::Return::from_bytes(response)?;

    // Step 3. Factorize PQ and construct the request for DH params.
    let server_dh_params = match server_dh_params {
        tl::enums::ServerDhParams::Fail(server_dh_params) => {
            // Even though this is a failing case, we should still perform
            // all the security checks.
            check_nonce(&server_dh_params.nonce, &nonce)?;
            check_server_nonce(&server_dh_params.server_nonce, &server_nonce)?;

            let sha = sha1!(new_nonce);
            let mut new_nonce_hash = [0; 16];
            new_nonce_hash.copy_from_slice(&sha[4..20]);
            check_new_nonce_hash(&server_dh_params.new_nonce_hash, &new_nonce_hash)?;

            return Err(Error::DhParamsFail);
        }
        tl::enums::ServerDhParams::Ok(x) => x,
    };

    check_nonce(&server_dh_params.nonce, &nonce)?;
    check_server_nonce(&server_dh_params.server_nonce, &server_nonce)?;

    let encrypted_len = server_dh_params.encrypted_answer.len();
    if encrypted_len % 16 != 0 || encrypted_len < 32 {
        return Err(Error::EncryptedResponseNotPadded { len: encrypted_len });
    }

    // Complete DH Exchange
    let (key, iv) = mtwire_crypto::generate_key_data_from_nonce(&server_nonce, &new_nonce);

    // sha1 hash + plain text + padding
    let plain_text_answer =
        mtwire_crypto::decrypt_ige(&server_dh_params.encrypted_answer, &key, &iv);

    let mut got_answer_hash = [0; 20];
    got_answer_hash.copy_from_slice(&plain_text_answer[..20]);

    // Use a cursor explicitly so we know where it ends (and most importantly
    // where the padding starts).
    let mut plain_text_cursor = Cursor::from_slice(&plain_text_answer[20..]);
    let server_dh_inner = tl::types::ServerDhInnerData::deserialize(&mut plain_text_cursor)
        .map_err(|error| Error::InvalidDhInnerData { error })?;

    let expected_answer_hash = sha1!(&plain_text_answer[20..20 + plain_text_cursor.pos()]);
    if got_answer_hash != expected_answer_hash {
        return Err(Error::InvalidAnswerHash {
            got: got_answer_hash,
            expected: expected_answer_hash,
        });
    }

    check_nonce(&server_dh_inner.nonce, &nonce)?;
    check_server_nonce(&server_dh_inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&server_dh_inner.dh_prime);
    let g_a = BigUint::from_bytes_be(&server_dh_inner.g_a);
    let g_value = u32::try_from(server_dh_inner.g).unwrap_or(0);

    dh::check_dh_prime(&dh_prime, g_value).map_err(|error| Error::InvalidDhPrime { error })?;

    let time_offset = server_dh_inner.server_time - now;
    debug!("server time offset is {time_offset}s");

    let exchange = Exchange {
        nonce,
        server_nonce,
        new_nonce,
        key,
        iv,
        g: BigUint::from(g_value),
        g_a,
        dh_prime,
        time_offset,
    };
    set_client_dh_params(exchange, 0, 0, random_bytes)
}

/// Picks `b` and builds `set_client_DH_params` for the given attempt.
fn set_client_dh_params(
    exchange: Exchange,
    retry_id: i64,
    retries: u32,
    random_bytes: &[u8; 256 + 16],
) -> Result<(Vec<u8>, Step3), Error> {
    let Exchange {
        nonce,
        server_nonce,
        ref key,
        ref iv,
        ref g,
        ref g_a,
        ref dh_prime,
        ..
    } = exchange;

    let b = BigUint::from_bytes_be(&random_bytes[..256]);
    let g_b = g.modpow(&b, dh_prime);
    let gab = g_a.modpow(&b, dh_prime);

    // IMPORTANT: Apart from the conditions on the Diffie-Hellman prime
    // dh_prime and generator g, both sides are to check that g, g_a and
    // g_b are greater than 1 and less than dh_prime - 1. We recommend
    // checking that g_a and g_b are between 2^{2048-64} and
    // dh_prime - 2^{2048-64} as well.
    // (https://core.telegram.org/mtproto/auth_key#dh-key-exchange-complete)
    check_g_in_range("g", g, dh::in_group_range(g, dh_prime))?;
    check_g_in_range("g_a", g_a, dh::in_group_range(g_a, dh_prime))?;
    check_g_in_range("g_b", &g_b, dh::in_group_range(&g_b, dh_prime))?;
    check_g_in_range("g_a", g_a, dh::in_safe_range(g_a, dh_prime))?;
    check_g_in_range("g_b", &g_b, dh::in_safe_range(&g_b, dh_prime))?;

    // Prepare client DH Inner Data
    let client_dh_inner = tl::types::ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id,
        g_b: g_b.to_bytes_be(),
    }
    .to_bytes();

    // sha1(client_dh_inner).digest() + client_dh_inner
    let client_dh_inner_hashed = {
        let mut buffer = Vec::with_capacity(20 + client_dh_inner.len() + 16);

        buffer.extend(sha1!(&client_dh_inner));
        buffer.extend(&client_dh_inner);

        // Make sure we pad it ourselves, or else `encrypt_ige` will,
        // introducing randomness.
        let pad_len = (16 - (buffer.len() % 16)) % 16;
        buffer.extend(&random_bytes[256..256 + pad_len]);

        buffer
    };

    let client_dh_encrypted = mtwire_crypto::encrypt_ige(&client_dh_inner_hashed, key, iv);

    Ok((
        tl::functions::SetClientDhParams {
            nonce,
            server_nonce,
            encrypted_data: client_dh_encrypted,
        }
        .to_bytes(),
        Step3 {
            exchange,
            gab,
            retries,
        },
    ))
}

/// The last step of the process to generate an authorization key.
///
/// The server may ask to try again with a different `g_b`, in which case
/// [`Outcome::Retry`] carries the new request.
pub fn create_key(data: Step3, response: &[u8]) -> Result<Outcome, Error> {
    trace!("auth create key response {}", hex::to_hex(response));

    let Step3 {
        exchange,
        gab,
        retries,
    } = data;
    let dh_gen = <tl::functions::SetClientDhParams as RemoteCall>::Return::from_bytes(response)?;

    struct DhGenData {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
        nonce_number: u8,
    }

    let dh_gen = match dh_gen {
        tl::enums::SetClientDhParamsAnswer::DhGenOk(x) => DhGenData {
            nonce: x.nonce,
            server_nonce: x.server_nonce,
            new_nonce_hash: x.new_nonce_hash1,
            nonce_number: 1,
        },
        tl::enums::SetClientDhParamsAnswer::DhGenRetry(x) => DhGenData {
            nonce: x.nonce,
            server_nonce: x.server_nonce,
            new_nonce_hash: x.new_nonce_hash2,
            nonce_number: 2,
        },
        tl::enums::SetClientDhParamsAnswer::DhGenFail(x) => DhGenData {
            nonce: x.nonce,
            server_nonce: x.server_nonce,
            new_nonce_hash: x.new_nonce_hash3,
            nonce_number: 3,
        },
    };

    check_nonce(&dh_gen.nonce, &exchange.nonce)?;
    check_server_nonce(&dh_gen.server_nonce, &exchange.server_nonce)?;

    let auth_key = {
        let mut buffer = [0; 256];
        let gab_bytes = gab.to_bytes_be();
        let skip = buffer.len() - gab_bytes.len(); // gab might need less than 256 bytes
        buffer[skip..].copy_from_slice(&gab_bytes);
        AuthKey::from_bytes(buffer)
    };

    let new_nonce_hash = auth_key.calc_new_nonce_hash(&exchange.new_nonce, dh_gen.nonce_number);
    check_new_nonce_hash(&dh_gen.new_nonce_hash, &new_nonce_hash)?;

    match dh_gen.nonce_number {
        1 => {
            let mut first_salt = [0; 8];
            first_salt
                .iter_mut()
                .zip(&exchange.new_nonce[..8])
                .zip(&exchange.server_nonce[..8])
                .for_each(|((x, a), b)| *x = a ^ b);

            debug!("generated new auth key {auth_key:?}");
            Ok(Outcome::Finished(Finished {
                auth_key: auth_key.to_bytes(),
                time_offset: exchange.time_offset,
                first_salt: i64::from_le_bytes(first_salt),
            }))
        }
        2 => {
            if retries >= MAX_DH_GEN_RETRIES {
                return Err(Error::DhGenRetryLimit);
            }
            debug!("server asked to retry the DH generation");
            let retry_id = i64::from_le_bytes(auth_key.aux_hash());
            let random_bytes = utils::random::<{ 256 + 16 }>();
            let (request, data) =
                set_client_dh_params(exchange, retry_id, retries + 1, &random_bytes)?;
            Ok(Outcome::Retry { request, data })
        }
        _ => Err(Error::DhGenFail),
    }
}

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash {
            got: *got,
            expected: *expected,
        })
    }
}

fn check_g_in_range(name: &'static str, value: &BigUint, in_range: bool) -> Result<(), Error> {
    if in_range {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange {
            name,
            value: value.clone(),
        })
    }
}

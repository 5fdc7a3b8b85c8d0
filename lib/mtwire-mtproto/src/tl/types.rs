// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Concrete records, both from the key exchange and from the
//! [service messages].
//!
//! [service messages]: https://core.telegram.org/mtproto/service_messages
use super::{Cursor, Deserializable, Identifiable, Result, Serializable};

// Key exchange.

tl_record!(ResPq = 0x05162463 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    pq: Vec<u8>,
    server_public_key_fingerprints: Vec<i64>,
});

tl_record!(PQInnerData = 0x83c95aec {
    pq: Vec<u8>,
    p: Vec<u8>,
    q: Vec<u8>,
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
});

tl_record!(PQInnerDataDc = 0xa9f55f95 {
    pq: Vec<u8>,
    p: Vec<u8>,
    q: Vec<u8>,
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    dc: i32,
});

tl_record!(ServerDhParamsFail = 0x79cb045d {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce_hash: [u8; 16],
});

tl_record!(ServerDhParamsOk = 0xd0e8075c {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    encrypted_answer: Vec<u8>,
});

tl_record!(ServerDhInnerData = 0xb5890dba {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    g: i32,
    dh_prime: Vec<u8>,
    g_a: Vec<u8>,
    server_time: i32,
});

tl_record!(ClientDhInnerData = 0x6643b654 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    retry_id: i64,
    g_b: Vec<u8>,
});

tl_record!(DhGenOk = 0x3bcbf734 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce_hash1: [u8; 16],
});

tl_record!(DhGenRetry = 0x46dc1fb9 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce_hash2: [u8; 16],
});

tl_record!(DhGenFail = 0xa69dae02 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce_hash3: [u8; 16],
});

// Service messages.

tl_record!(RpcError = 0x2144ca19 {
    error_code: i32,
    error_message: String,
});

tl_record!(RpcAnswerUnknown = 0x5e2ad36e {});

tl_record!(RpcAnswerDroppedRunning = 0xcd78e586 {});

tl_record!(RpcAnswerDropped = 0xa43ad8b7 {
    msg_id: i64,
    seq_no: i32,
    bytes: i32,
});

tl_record!(
    /// Acknowledges the receipt of content-related messages.
    MsgsAck = 0x62d6b459 {
        msg_ids: Vec<i64>,
    }
);

tl_record!(BadMsgNotification = 0xa7eff811 {
    bad_msg_id: i64,
    bad_msg_seqno: i32,
    error_code: i32,
});

tl_record!(BadServerSalt = 0xedab447b {
    bad_msg_id: i64,
    bad_msg_seqno: i32,
    error_code: i32,
    new_server_salt: i64,
});

tl_record!(MsgsStateReq = 0xda69fb52 {
    msg_ids: Vec<i64>,
});

tl_record!(
    /// One status byte per queried message, in the same order.
    MsgsStateInfo = 0x04deb57d {
        req_msg_id: i64,
        info: Vec<u8>,
    }
);

tl_record!(MsgsAllInfo = 0x8cc0d131 {
    msg_ids: Vec<i64>,
    info: Vec<u8>,
});

tl_record!(MsgDetailedInfo = 0x276d3ec6 {
    msg_id: i64,
    answer_msg_id: i64,
    bytes: i32,
    status: i32,
});

tl_record!(MsgNewDetailedInfo = 0x809db6df {
    answer_msg_id: i64,
    bytes: i32,
    status: i32,
});

tl_record!(MsgResendReq = 0x7d861a08 {
    msg_ids: Vec<i64>,
});

tl_record!(MsgResendAnsReq = 0x8610baeb {
    msg_ids: Vec<i64>,
});

tl_record!(FutureSalt = 0x0949d9dc {
    valid_since: i32,
    valid_until: i32,
    salt: i64,
});

tl_record!(Pong = 0x347773c5 {
    msg_id: i64,
    ping_id: i64,
});

tl_record!(DestroySessionOk = 0xe22045fc {
    session_id: i64,
});

tl_record!(DestroySessionNone = 0x62d350c9 {
    session_id: i64,
});

tl_record!(NewSessionCreated = 0x9ec20908 {
    first_msg_id: i64,
    unique_id: i64,
    server_salt: i64,
});

tl_record!(HttpWait = 0x9299359f {
    max_delay: i32,
    wait_after: i32,
    max_wait: i32,
});

/// `future_salts`, whose salts are a bare vector of bare `future_salt`.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
}

impl Serializable for FutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.now.serialize(buf);
        (self.salts.len() as i32).serialize(buf);
        for salt in &self.salts {
            salt.valid_since.serialize(buf);
            salt.valid_until.serialize(buf);
            salt.salt.serialize(buf);
        }
    }
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let len = u32::deserialize(buf)? as usize;
        let salts = (0..len)
            .map(|_| FutureSalt::deserialize_bare(buf))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            req_msg_id,
            now,
            salts,
        })
    }
}

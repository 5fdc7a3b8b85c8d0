// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Functions the client invokes on the server.
use super::{Cursor, Deserializable, Identifiable, RemoteCall, Result, Serializable, enums, types};

/// `auth.logOut`. The only call the server may complete with a bare
/// acknowledgement instead of a result.
pub const AUTH_LOG_OUT_ID: u32 = 0x3e72ba19;

tl_record!(ReqPqMulti = 0xbe7e8ef1 {
    nonce: [u8; 16],
});

tl_record!(ReqDhParams = 0xd712e4be {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    p: Vec<u8>,
    q: Vec<u8>,
    public_key_fingerprint: i64,
    encrypted_data: Vec<u8>,
});

tl_record!(SetClientDhParams = 0xf5045f1f {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    encrypted_data: Vec<u8>,
});

tl_record!(Ping = 0x7abe77ec {
    ping_id: i64,
});

tl_record!(
    /// Like `ping`, but also asks the server to close the connection if no
    /// other ping arrives within `disconnect_delay` seconds.
    PingDelayDisconnect = 0xf3427b8c {
        ping_id: i64,
        disconnect_delay: i32,
    }
);

tl_record!(GetFutureSalts = 0xb921bd04 {
    num: i32,
});

tl_record!(DestroySession = 0xe7512126 {
    session_id: i64,
});

tl_record!(RpcDropAnswer = 0x58e4a740 {
    req_msg_id: i64,
});

impl RemoteCall for ReqPqMulti {
    type Return = types::ResPq;
}

impl RemoteCall for ReqDhParams {
    type Return = enums::ServerDhParams;
}

impl RemoteCall for SetClientDhParams {
    type Return = enums::SetClientDhParamsAnswer;
}

impl RemoteCall for Ping {
    type Return = types::Pong;
}

impl RemoteCall for PingDelayDisconnect {
    type Return = types::Pong;
}

impl RemoteCall for GetFutureSalts {
    type Return = types::FutureSalts;
}

impl RemoteCall for DestroySession {
    type Return = enums::DestroySessionRes;
}

impl RemoteCall for RpcDropAnswer {
    type Return = enums::RpcDropAnswer;
}

/// `invokeWithLayer`, wrapping an already serialized query.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithLayer {
    pub layer: i32,
    pub query: Vec<u8>,
}

impl Identifiable for InvokeWithLayer {
    const CONSTRUCTOR_ID: u32 = 0xda9b0d0d;
}

impl Serializable for InvokeWithLayer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.layer.serialize(buf);
        buf.extend(self.query.iter().copied());
    }
}

impl Deserializable for InvokeWithLayer {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            layer: i32::deserialize(buf)?,
            query: buf.read_to_end().to_vec(),
        })
    }
}

/// `initConnection` without a proxy or extra parameters, wrapping an
/// already serialized query.
#[derive(Clone, Debug, PartialEq)]
pub struct InitConnection {
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
    pub query: Vec<u8>,
}

impl Identifiable for InitConnection {
    const CONSTRUCTOR_ID: u32 = 0xc1cd5ea9;
}

impl Serializable for InitConnection {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        0u32.serialize(buf); // flags
        self.api_id.serialize(buf);
        self.device_model.serialize(buf);
        self.system_version.serialize(buf);
        self.app_version.serialize(buf);
        self.system_lang_code.serialize(buf);
        self.lang_pack.serialize(buf);
        self.lang_code.serialize(buf);
        buf.extend(self.query.iter().copied());
    }
}

impl Deserializable for InitConnection {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        buf.expect_id(Self::CONSTRUCTOR_ID)?;
        let flags = u32::deserialize(buf)?;
        if flags != 0 {
            return Err(super::Error::UnexpectedConstructor { id: flags });
        }

        Ok(Self {
            api_id: i32::deserialize(buf)?,
            device_model: String::deserialize(buf)?,
            system_version: String::deserialize(buf)?,
            app_version: String::deserialize(buf)?,
            system_lang_code: String::deserialize(buf)?,
            lang_pack: String::deserialize(buf)?,
            lang_code: String::deserialize(buf)?,
            query: buf.read_to_end().to_vec(),
        })
    }
}

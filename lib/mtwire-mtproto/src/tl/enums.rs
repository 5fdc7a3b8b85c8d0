// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Boxed types, and the closed set of messages the server can send
//! outside of a result.
use super::types;
use super::{
    Cursor, Deserializable, GzipPacked, Identifiable, MessageContainer, MessageCopy, Result,
    RpcResult, Serializable,
};

tl_enum!(ServerDhParams {
    Fail(types::ServerDhParamsFail),
    Ok(types::ServerDhParamsOk),
});

tl_enum!(SetClientDhParamsAnswer {
    DhGenOk(types::DhGenOk),
    DhGenRetry(types::DhGenRetry),
    DhGenFail(types::DhGenFail),
});

tl_enum!(DestroySessionRes {
    Ok(types::DestroySessionOk),
    None(types::DestroySessionNone),
});

tl_enum!(RpcDropAnswer {
    Unknown(types::RpcAnswerUnknown),
    DroppedRunning(types::RpcAnswerDroppedRunning),
    Dropped(types::RpcAnswerDropped),
});

/// Every top-level message kind the server may send.
///
/// Anything the protocol layer does not know about is an update meant for
/// the layers above, and is left serialized in [`Service::Other`].
#[derive(Clone, Debug, PartialEq)]
pub enum Service {
    RpcResult(RpcResult),
    MsgContainer(MessageContainer),
    MsgCopy(MessageCopy),
    GzipPacked(GzipPacked),
    Pong(types::Pong),
    BadServerSalt(types::BadServerSalt),
    BadMsgNotification(types::BadMsgNotification),
    MsgsAck(types::MsgsAck),
    NewSessionCreated(types::NewSessionCreated),
    MsgDetailedInfo(types::MsgDetailedInfo),
    MsgNewDetailedInfo(types::MsgNewDetailedInfo),
    FutureSalts(types::FutureSalts),
    MsgsStateReq(types::MsgsStateReq),
    MsgResendReq(types::MsgResendReq),
    MsgResendAnsReq(types::MsgResendAnsReq),
    MsgsStateInfo(types::MsgsStateInfo),
    MsgsAllInfo(types::MsgsAllInfo),
    DestroySession(DestroySessionRes),
    HttpWait(types::HttpWait),
    Other { id: u32 },
}

impl Service {
    /// Classifies a message body by its constructor.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let buf = &mut Cursor::from_slice(body);
        let id = buf.peek_id()?;

        macro_rules! parse {
            ($($variant:ident($ty:ty)),+ $(,)?) => {
                $(
                    if id == <$ty as Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty>::deserialize(buf)?));
                    }
                )+
            };
        }

        parse!(
            RpcResult(RpcResult),
            MsgContainer(MessageContainer),
            MsgCopy(MessageCopy),
            GzipPacked(GzipPacked),
            Pong(types::Pong),
            BadServerSalt(types::BadServerSalt),
            BadMsgNotification(types::BadMsgNotification),
            MsgsAck(types::MsgsAck),
            NewSessionCreated(types::NewSessionCreated),
            MsgDetailedInfo(types::MsgDetailedInfo),
            MsgNewDetailedInfo(types::MsgNewDetailedInfo),
            FutureSalts(types::FutureSalts),
            MsgsStateReq(types::MsgsStateReq),
            MsgResendReq(types::MsgResendReq),
            MsgResendAnsReq(types::MsgResendAnsReq),
            MsgsStateInfo(types::MsgsStateInfo),
            MsgsAllInfo(types::MsgsAllInfo),
            HttpWait(types::HttpWait),
        );

        if id == types::DestroySessionOk::CONSTRUCTOR_ID
            || id == types::DestroySessionNone::CONSTRUCTOR_ID
        {
            return Ok(Self::DestroySession(DestroySessionRes::deserialize(buf)?));
        }

        Ok(Self::Other { id })
    }
}

impl Serializable for Service {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            Self::RpcResult(x) => x.serialize(buf),
            Self::MsgContainer(x) => x.serialize(buf),
            Self::MsgCopy(x) => x.serialize(buf),
            Self::GzipPacked(x) => x.serialize(buf),
            Self::Pong(x) => x.serialize(buf),
            Self::BadServerSalt(x) => x.serialize(buf),
            Self::BadMsgNotification(x) => x.serialize(buf),
            Self::MsgsAck(x) => x.serialize(buf),
            Self::NewSessionCreated(x) => x.serialize(buf),
            Self::MsgDetailedInfo(x) => x.serialize(buf),
            Self::MsgNewDetailedInfo(x) => x.serialize(buf),
            Self::FutureSalts(x) => x.serialize(buf),
            Self::MsgsStateReq(x) => x.serialize(buf),
            Self::MsgResendReq(x) => x.serialize(buf),
            Self::MsgResendAnsReq(x) => x.serialize(buf),
            Self::MsgsStateInfo(x) => x.serialize(buf),
            Self::MsgsAllInfo(x) => x.serialize(buf),
            Self::DestroySession(x) => x.serialize(buf),
            Self::HttpWait(x) => x.serialize(buf),
            Self::Other { id } => id.serialize(buf),
        }
    }
}

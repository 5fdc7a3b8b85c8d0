// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{
    BadMessage, Deserialization, DeserializationFailure, DeserializeError, Mtp, RpcResult,
    RpcResultError,
};
use crate::session::Session;
use crate::tl::enums::Service;
use crate::tl::{
    self, Deserializable, GzipPacked, Identifiable, Message, MessageContainer, Serializable,
    types,
};
use crate::{MsgId, utils};
use log::{debug, trace, warn};
use mtwire_crypto::{AuthKey, Side};
use std::collections::VecDeque;
use std::mem;

/// How many inbound message identifiers are remembered, to tell apart
/// answers that were already received from those that were lost.
pub const RECENT_INBOUND_LEN: usize = 100;

pub struct Builder {
    time_offset: i32,
    first_salt: i64,
    compression_threshold: Option<usize>,
}

/// The state of an encrypted session as seen by the client.
pub struct Encrypted {
    session: Session,

    /// The time offset from the server's time, in seconds.
    time_offset: i32,

    /// The current message sequence number.
    sequence: i32,

    /// The ID of the last message.
    last_msg_id: i64,

    /// Identifiers that need to be acknowledged to the server.
    ///
    /// A [Content-related Message] is "a message requiring an explicit
    /// acknowledgment. These include all the user and many service messages,
    /// virtually all with the exception of containers and acknowledgments."
    ///
    /// [Content-related Message]: https://core.telegram.org/mtproto/description#content-related-message
    pending_ack: Vec<i64>,

    /// Serialized service messages produced in reaction to the server,
    /// sent along with the next batch.
    pending_replies: Vec<Vec<u8>>,

    /// The most recent identifiers received from the server, oldest first.
    recent_inbound: VecDeque<i64>,

    /// If present, the threshold in bytes at which a message will be
    /// considered large enough to attempt compressing it. Otherwise,
    /// outgoing messages will never be compressed.
    compression_threshold: Option<usize>,

    /// How many messages are there in the buffer.
    msg_count: usize,
}

impl Builder {
    /// Configures the time offset to Telegram servers.
    pub fn time_offset(mut self, offset: i32) -> Self {
        self.time_offset = offset;
        self
    }

    pub fn first_salt(mut self, first_salt: i64) -> Self {
        self.first_salt = first_salt;
        self
    }

    /// Configures the compression threshold for outgoing messages.
    pub fn compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Finishes the builder and returns the `MTProto` instance with all
    /// the configuration changes applied.
    pub fn finish(self, auth_key: AuthKey) -> Encrypted {
        let mut session = Session::with_key(auth_key, Side::Client);
        session.set_salt(self.first_salt);

        Encrypted {
            session,
            time_offset: self.time_offset,
            sequence: 0,
            last_msg_id: 0,
            pending_ack: Vec::new(),
            pending_replies: Vec::new(),
            recent_inbound: VecDeque::with_capacity(RECENT_INBOUND_LEN),
            compression_threshold: self.compression_threshold,
            msg_count: 0,
        }
    }
}

impl Encrypted {
    /// Start building a new encrypted MTP.
    pub fn build() -> Builder {
        Builder {
            time_offset: 0,
            first_salt: 0,
            compression_threshold: crate::DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The authorization key used for encryption and decryption.
    pub fn auth_key(&self) -> Option<[u8; 256]> {
        self.session.auth_key().map(AuthKey::to_bytes)
    }

    pub fn salt(&self) -> i64 {
        self.session.salt()
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    /// Correct our time offset based on a known valid message ID.
    fn correct_time_offset(&mut self, msg_id: i64) {
        let now = utils::since_epoch().as_secs() as i64;
        let correct = msg_id >> 32;
        self.time_offset = (correct - now) as i32;
        debug!("time offset corrected to {}s", self.time_offset);
    }

    fn get_new_msg_id(&mut self) -> i64 {
        utils::next_msg_id(&mut self.last_msg_id, self.time_offset)
    }

    /// Generates the next sequence number depending on whether
    /// it should be for a content-related query or not.
    fn get_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            self.sequence += 1;
            self.sequence * 2 - 1
        } else {
            self.sequence * 2
        }
    }

    fn serialize_msg(&mut self, buffer: &mut Vec<u8>, body: &[u8], content_related: bool) -> MsgId {
        let msg_id = self.get_new_msg_id();

        msg_id.serialize(buffer);
        self.get_seq_no(content_related).serialize(buffer);
        (body.len() as i32).serialize(buffer);
        buffer.extend_from_slice(body);

        self.msg_count += 1;
        MsgId(msg_id)
    }

    /// Acknowledgements and replies go first, so that they are sent as
    /// soon as possible.
    fn push_service(&mut self, buffer: &mut Vec<u8>) {
        if !self.pending_ack.is_empty() {
            let body = types::MsgsAck {
                msg_ids: mem::take(&mut self.pending_ack),
            }
            .to_bytes();
            self.serialize_msg(buffer, &body, false);
        }

        for body in mem::take(&mut self.pending_replies) {
            self.serialize_msg(buffer, &body, true);
        }
    }

    /// `finalize`, but without encryption.
    fn finalize_plain(&mut self, buffer: &mut Vec<u8>) -> Option<Message> {
        match mem::take(&mut self.msg_count) {
            0 => None,
            1 => {
                let message = Message::from_bytes(buffer).ok();
                buffer.clear();
                message
            }
            count => {
                let mut body = Vec::with_capacity(MessageContainer::SIZE_OVERHEAD + buffer.len());
                MessageContainer::CONSTRUCTOR_ID.serialize(&mut body);
                (count as i32).serialize(&mut body);
                body.append(buffer);

                Some(Message {
                    msg_id: self.get_new_msg_id(),
                    seq_no: self.get_seq_no(false),
                    body,
                })
            }
        }
    }

    fn remember_inbound(&mut self, msg_id: i64) {
        if self.recent_inbound.len() == RECENT_INBOUND_LEN {
            self.recent_inbound.pop_front();
        }
        self.recent_inbound.push_back(msg_id);
    }

    /// Every inbound message goes through here, containers' contents included.
    ///
    /// Messages that cannot be understood are dropped; they never take the
    /// stream down.
    fn process_message(&mut self, message: Message, results: &mut Vec<Deserialization>) {
        if !MsgId(message.msg_id).is_from_server() {
            warn!("dropping message with even id {}", message.msg_id);
            return;
        }
        if self.recent_inbound.contains(&message.msg_id) {
            warn!("dropping duplicate message {}", message.msg_id);
            return;
        }

        if message.requires_ack() {
            self.pending_ack.push(message.msg_id);
        }
        self.remember_inbound(message.msg_id);

        let msg_id = message.msg_id;
        if let Err(e) = self.dispatch(msg_id, message.body, results) {
            warn!("dropping message {msg_id} that could not be processed: {e}");
        }
    }

    /// Handle all the possible [Service Messages].
    ///
    /// [Service Messages]: https://core.telegram.org/mtproto/service_messages
    fn dispatch(
        &mut self,
        msg_id: i64,
        body: Vec<u8>,
        results: &mut Vec<Deserialization>,
    ) -> Result<(), DeserializeError> {
        match Service::from_body(&body)? {
            Service::RpcResult(result) => self.handle_rpc_result(result, results),
            Service::MsgContainer(container) => {
                for inner in container.messages {
                    self.process_message(inner, results);
                }
            }
            Service::MsgCopy(copy) => self.process_message(copy.orig_message, results),
            Service::GzipPacked(packed) => {
                let body = packed
                    .decompress()
                    .map_err(|_| DeserializeError::DecompressionFailed)?;
                self.dispatch(msg_id, body, results)?;
            }
            Service::Pong(pong) => {
                // Answered like any other call, the ping may be the caller's own.
                results.push(Deserialization::RpcResult(RpcResult {
                    msg_id: MsgId(pong.msg_id),
                    body,
                }));
            }
            Service::BadServerSalt(bad) => {
                debug!(
                    "bad server salt for {}, now using {}",
                    bad.bad_msg_id, bad.new_server_salt
                );
                self.session.set_salt(bad.new_server_salt);
                results.push(Deserialization::BadMessage(BadMessage {
                    msg_id: MsgId(bad.bad_msg_id),
                    code: bad.error_code,
                }));
            }
            Service::BadMsgNotification(bad) => self.handle_bad_notification(msg_id, bad, results),
            Service::MsgsAck(ack) => {
                results.extend(
                    ack.msg_ids
                        .into_iter()
                        .map(|id| Deserialization::Acknowledged(MsgId(id))),
                );
            }
            Service::NewSessionCreated(created) => {
                debug!(
                    "new session created, first message {}",
                    created.first_msg_id
                );
                self.session.set_salt(created.server_salt);
                results.push(Deserialization::NewSession {
                    first_msg_id: MsgId(created.first_msg_id),
                });
            }
            Service::MsgDetailedInfo(info) => {
                // Whether the message is still waiting for an answer is up to the caller.
                results.push(Deserialization::DetailedInfo {
                    msg_id: MsgId(info.msg_id),
                    answer_msg_id: MsgId(info.answer_msg_id),
                });
            }
            Service::MsgNewDetailedInfo(info) => {
                if self.recent_inbound.contains(&info.answer_msg_id) {
                    self.pending_ack.push(info.answer_msg_id);
                } else {
                    self.request_resend(MsgId(info.answer_msg_id));
                }
            }
            Service::FutureSalts(salts) => {
                results.push(Deserialization::RpcResult(RpcResult {
                    msg_id: MsgId(salts.req_msg_id),
                    body,
                }));
            }
            Service::MsgsStateReq(types::MsgsStateReq { msg_ids })
            | Service::MsgResendReq(types::MsgResendReq { msg_ids }) => {
                // Nothing is kept around to be resent, so everything is reported as unknown.
                self.pending_replies.push(
                    types::MsgsStateInfo {
                        req_msg_id: msg_id,
                        info: vec![0x01; msg_ids.len()],
                    }
                    .to_bytes(),
                );
            }
            Service::MsgResendAnsReq(_)
            | Service::MsgsStateInfo(_)
            | Service::MsgsAllInfo(_)
            | Service::DestroySession(_)
            | Service::HttpWait(_) => {
                debug!("ignoring service message {msg_id}");
            }
            Service::Other { id } => {
                trace!("update {id:08x} in message {msg_id}");
                results.push(Deserialization::Update(body));
            }
        }

        Ok(())
    }

    /// Any error during a RPC result is handed to the caller, so that only
    /// the affected call fails.
    fn handle_rpc_result(&mut self, result: tl::RpcResult, results: &mut Vec<Deserialization>) {
        let tl::RpcResult { req_msg_id, result } = result;
        let msg_id = MsgId(req_msg_id);

        let failure = |error: DeserializeError| {
            Deserialization::Failure(DeserializationFailure { msg_id, error })
        };

        let inner_constructor = match u32::from_bytes(&result) {
            Ok(id) => id,
            Err(e) => {
                results.push(failure(e.into()));
                return;
            }
        };

        match inner_constructor {
            types::RpcError::CONSTRUCTOR_ID => results.push(match types::RpcError::from_bytes(&result) {
                Ok(error) => Deserialization::RpcError(RpcResultError { msg_id, error }),
                Err(e) => failure(e.into()),
            }),
            types::RpcAnswerUnknown::CONSTRUCTOR_ID
            | types::RpcAnswerDroppedRunning::CONSTRUCTOR_ID
            | types::RpcAnswerDropped::CONSTRUCTOR_ID => {
                debug!("answer to {req_msg_id} was dropped");
            }
            GzipPacked::CONSTRUCTOR_ID => {
                let body = GzipPacked::from_bytes(&result)
                    .map_err(DeserializeError::from)
                    .and_then(|packed| {
                        packed
                            .decompress()
                            .map_err(|_| DeserializeError::DecompressionFailed)
                    });
                results.push(match body {
                    Ok(body) => Deserialization::RpcResult(RpcResult { msg_id, body }),
                    Err(e) => failure(e),
                });
            }
            _ => results.push(Deserialization::RpcResult(RpcResult {
                msg_id,
                body: result,
            })),
        }
    }

    /// Corrects whatever state caused the [notice], and reports it.
    ///
    /// [notice]: https://core.telegram.org/mtproto/service_messages_about_messages#notice-of-ignored-error-message
    fn handle_bad_notification(
        &mut self,
        msg_id: i64,
        bad: types::BadMsgNotification,
        results: &mut Vec<Deserialization>,
    ) {
        let bad_msg = BadMessage {
            msg_id: MsgId(bad.bad_msg_id),
            code: bad.error_code,
        };
        debug!(
            "bad message {}: {} ({})",
            bad.bad_msg_id,
            bad_msg.description(),
            bad.error_code
        );

        match bad.error_code {
            // The server's message identifier carries its clock.
            16 | 17 => self.correct_time_offset(msg_id),
            32 => self.sequence += 64,
            33 => self.sequence -= 16,
            _ => {}
        }

        results.push(Deserialization::BadMessage(bad_msg));
    }
}

impl Mtp for Encrypted {
    fn push(&mut self, buffer: &mut Vec<u8>, request: &[u8]) -> Option<MsgId> {
        self.push_service(buffer);

        // Serialize `MAXIMUM_LENGTH` requests at most.
        if self.msg_count >= MessageContainer::MAXIMUM_LENGTH {
            return None;
        }

        // Requests that are too large must be rejected by the caller.
        assert!(request.len() + Message::SIZE_OVERHEAD <= MessageContainer::MAXIMUM_SIZE);

        // Serialized requests will always be correctly padded.
        assert!(request.len() % 4 == 0);

        // Payload provided by the user is always considered to be
        // content-related, which means we can apply compression.
        let mut body = request;
        let compressed;
        if let Some(threshold) = self.compression_threshold {
            if request.len() >= threshold {
                if let Ok(packed) = GzipPacked::new(request) {
                    compressed = packed.to_bytes();
                    if compressed.len() < request.len() {
                        body = &compressed;
                    }
                }
            }
        }

        let new_size = buffer.len() + body.len() + Message::SIZE_OVERHEAD;
        if self.msg_count > 0 && new_size > MessageContainer::MAXIMUM_SIZE {
            // No more messages fit in this container.
            return None;
        }

        Some(self.serialize_msg(buffer, body, true))
    }

    fn finalize(&mut self, buffer: &mut Vec<u8>) -> Option<MsgId> {
        self.push_service(buffer);
        let message = self.finalize_plain(buffer)?;
        *buffer = self
            .session
            .encrypt(&message.body, message.msg_id, message.seq_no)?;
        Some(MsgId(message.msg_id))
    }

    fn deserialize(&mut self, payload: &[u8]) -> Result<Vec<Deserialization>, DeserializeError> {
        let Some(message) = self.session.decrypt(payload) else {
            warn!("dropping {} bytes that could not be decrypted", payload.len());
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        self.process_message(
            Message {
                msg_id: message.msg_id,
                seq_no: message.seq_no,
                body: message.body,
            },
            &mut results,
        );
        Ok(results)
    }

    /// Starts a new session over the same key.
    fn reset(&mut self) {
        self.session.set_session_id(utils::random_i64());
        self.sequence = 0;
        self.pending_ack.clear();
        self.pending_replies.clear();
        self.recent_inbound.clear();
        self.msg_count = 0;
    }

    fn ack(&mut self, msg_id: MsgId) {
        self.pending_ack.push(msg_id.0);
    }

    fn request_resend(&mut self, msg_id: MsgId) {
        self.pending_replies.push(
            types::MsgResendReq {
                msg_ids: vec![msg_id.0],
            }
            .to_bytes(),
        );
    }

    fn has_pending_acks(&self) -> bool {
        !self.pending_ack.is_empty()
    }

    fn has_pending_replies(&self) -> bool {
        !self.pending_replies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    // gzip_packed#3072cfa1 packed_data:string = Object;
    const GZIP_PACKED_HEADER: [u8; 4] = [0xa1, 0xcf, 0x72, 0x30];

    // msg_container#73f1f8dc messages:vector<message> = MessageContainer;
    const MSG_CONTAINER_HEADER: [u8; 4] = [0xdc, 0xf8, 0xf1, 0x73];

    const REQUEST: &[u8] = b"Hey!";
    const REQUEST_B: &[u8] = b"Bye!";

    fn auth_key() -> AuthKey {
        AuthKey::from_bytes([0; 256])
    }

    /// The session the server would use to talk to `mtp`.
    fn server_for(mtp: &Encrypted) -> Session {
        let mut server = Session::with_key(auth_key(), Side::Server);
        server.set_session_id(mtp.session().session_id());
        server
    }

    fn server_msg_id(offset: i64, n: i64) -> i64 {
        let now = utils::since_epoch().as_secs() as i64;
        ((now + offset) << 32) | (n << 2) | 1
    }

    /// Receives `body` under a message id not used before.
    fn receive(mtp: &mut Encrypted, seq_no: i32, body: &[u8]) -> Vec<Deserialization> {
        static NEXT: AtomicI64 = AtomicI64::new(1000);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        receive_with_id(mtp, server_msg_id(0, n), seq_no, body)
    }

    fn receive_with_id(
        mtp: &mut Encrypted,
        msg_id: i64,
        seq_no: i32,
        body: &[u8],
    ) -> Vec<Deserialization> {
        let frame = server_for(mtp).encrypt(body, msg_id, seq_no).unwrap();
        mtp.deserialize(&frame).unwrap()
    }

    /// Finalizes and opens the result the way the server would.
    fn sent_messages(mtp: &mut Encrypted) -> Vec<Message> {
        let mut buffer = Vec::new();
        mtp.finalize(&mut buffer).unwrap();
        let message = server_for(mtp).decrypt(&buffer).unwrap();
        match MessageContainer::from_bytes(&message.body) {
            Ok(container) => container.messages,
            Err(_) => vec![Message {
                msg_id: message.msg_id,
                seq_no: message.seq_no,
                body: message.body,
            }],
        }
    }

    fn ensure_buffer_is_message(buffer: &[u8], body: &[u8], seq_no: u8) {
        // buffer[0..8] is the msg_id, based on `SystemTime::now()`
        assert_ne!(&buffer[0..8], [0, 0, 0, 0, 0, 0, 0, 0]);
        // buffer[8..12] is the seq_no, ever-increasing odd number (little endian)
        assert_eq!(&buffer[8..12], [seq_no, 0, 0, 0]);
        // buffer[12..16] is the bytes, the len of the body (little endian)
        assert_eq!(&buffer[12..16], [body.len() as u8, 0, 0, 0]);
        // buffer[16..] is the body, which is padded to 4 bytes
        assert_eq!(&buffer[16..], body);
    }

    #[test]
    fn ensure_correct_single_serialization() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = Vec::new();

        let msg_id = mtp.push(&mut buffer, REQUEST).unwrap();
        let message = mtp.finalize_plain(&mut buffer).unwrap();

        assert!(buffer.is_empty());
        assert_eq!(message.msg_id, msg_id.0);
        assert_eq!(message.seq_no, 1);
        assert_eq!(message.body, REQUEST);
    }

    #[test]
    fn ensure_correct_multi_serialization() {
        let mut mtp = Encrypted::build()
            .compression_threshold(None)
            .finish(auth_key());
        let mut buffer = Vec::new();

        assert!(mtp.push(&mut buffer, REQUEST).is_some());
        assert!(mtp.push(&mut buffer, REQUEST_B).is_some());
        let container = mtp.finalize_plain(&mut buffer).unwrap();

        // after two messages (1, 3) the next non-content related is 4.
        assert_eq!(container.seq_no, 4);
        let body = &container.body;
        assert_eq!(&body[0..4], MSG_CONTAINER_HEADER);
        // how many messages are included
        assert_eq!(&body[4..8], [2, 0, 0, 0]);
        ensure_buffer_is_message(&body[8..28], REQUEST, 1);
        ensure_buffer_is_message(&body[28..], REQUEST_B, 3);
    }

    #[test]
    fn ensure_msg_ids_increase_across_calls() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = Vec::new();

        let mut last = 0;
        for _ in 0..50 {
            let msg_id = mtp.push(&mut buffer, REQUEST).unwrap().0;
            assert!(msg_id > last);
            assert_eq!(msg_id % 4, 0);
            last = msg_id;
        }
    }

    #[test]
    fn ensure_container_length_limit() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = Vec::new();

        for _ in 0..MessageContainer::MAXIMUM_LENGTH {
            assert!(mtp.push(&mut buffer, REQUEST).is_some());
        }
        assert!(mtp.push(&mut buffer, REQUEST).is_none());
    }

    #[test]
    fn ensure_correct_multi_large_serialization() {
        let mut mtp = Encrypted::build()
            .compression_threshold(None)
            .finish(auth_key());
        let mut buffer = Vec::new();
        let data = vec![0x7f; 768 * 1024];

        assert!(mtp.push(&mut buffer, &data).is_some());
        assert!(mtp.push(&mut buffer, &data).is_none());

        // No container should be used.
        let message = mtp.finalize_plain(&mut buffer).unwrap();
        assert_eq!(message.body.len(), data.len());
    }

    #[test]
    #[should_panic]
    fn ensure_large_payload_panics() {
        let mut mtp = Encrypted::build().finish(auth_key());
        mtp.push(&mut Vec::new(), &vec![0; 2 * 1024 * 1024]);
    }

    #[test]
    #[should_panic]
    fn ensure_non_padded_payload_panics() {
        let mut mtp = Encrypted::build().finish(auth_key());
        mtp.push(&mut Vec::new(), &[1, 2, 3]);
    }

    #[test]
    fn ensure_some_compression() {
        let compresses = |threshold| {
            let mut mtp = Encrypted::build()
                .compression_threshold(threshold)
                .finish(auth_key());
            let mut buffer = Vec::new();
            mtp.push(&mut buffer, &vec![0; 512 * 1024]);
            let message = mtp.finalize_plain(&mut buffer).unwrap();
            message.body.starts_with(&GZIP_PACKED_HEADER)
        };

        assert!(!compresses(None));
        assert!(!compresses(Some(768 * 1024)));
        assert!(compresses(Some(256 * 1024)));
        assert!(compresses(crate::DEFAULT_COMPRESSION_THRESHOLD));
    }

    #[test]
    fn finalize_encrypts_with_salt_and_session() {
        let mut mtp = Encrypted::build().first_salt(77).finish(auth_key());
        let mut buffer = Vec::new();

        let msg_id = mtp.push(&mut buffer, REQUEST).unwrap();
        assert_eq!(mtp.finalize(&mut buffer), Some(msg_id));

        let message = server_for(&mtp).decrypt(&buffer).unwrap();
        assert_eq!(message.salt, 77);
        assert_eq!(message.msg_id, msg_id.0);
        assert_eq!(message.body, REQUEST);
    }

    #[test]
    fn finalize_without_messages_sends_nothing() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let mut buffer = Vec::new();
        assert_eq!(mtp.finalize(&mut buffer), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn garbage_and_even_ids_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        assert_eq!(mtp.deserialize(&[0x55; 200]), Ok(Vec::new()));

        let even = server_msg_id(0, 1) - 1;
        assert_eq!(receive_with_id(&mut mtp, even, 1, &[1, 0, 0, 0]), Vec::new());
        assert!(!mtp.has_pending_acks());
    }

    #[test]
    fn even_ids_inside_containers_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let update = [0x40, 0x42, 0xae, 0x74, 0, 0, 0, 0];
        let even = server_msg_id(0, 2) - 1;
        let odd = even + 5;
        let container = MessageContainer {
            messages: vec![
                Message {
                    msg_id: even,
                    seq_no: 1,
                    body: update.to_vec(),
                },
                Message {
                    msg_id: odd,
                    seq_no: 3,
                    body: update.to_vec(),
                },
            ],
        };

        assert_eq!(
            receive_with_id(&mut mtp, odd + 4, 4, &container.to_bytes()),
            vec![Deserialization::Update(update.to_vec())]
        );
        assert_eq!(mtp.pending_ack, vec![odd]);
        assert!(!mtp.recent_inbound.contains(&even));
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let bad = types::BadMsgNotification {
            bad_msg_id: 1000,
            bad_msg_seqno: 1,
            error_code: 32,
        };
        let msg_id = server_msg_id(0, 5);
        let frame = server_for(&mtp).encrypt(&bad.to_bytes(), msg_id, 2).unwrap();

        assert_eq!(mtp.deserialize(&frame).unwrap().len(), 1);
        assert_eq!(mtp.deserialize(&frame), Ok(Vec::new()));
        assert_eq!(mtp.sequence, 64);

        // Also when the copy arrives inside a container.
        let container = MessageContainer {
            messages: vec![Message {
                msg_id,
                seq_no: 2,
                body: bad.to_bytes(),
            }],
        };
        assert_eq!(
            receive_with_id(&mut mtp, server_msg_id(0, 6), 4, &container.to_bytes()),
            Vec::new()
        );
        assert_eq!(mtp.sequence, 64);
    }

    #[test]
    fn malformed_records_are_dropped() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let truncated = types::BadMsgNotification::CONSTRUCTOR_ID.to_le_bytes();

        let msg_id = server_msg_id(0, 7);
        assert_eq!(receive_with_id(&mut mtp, msg_id, 2, &truncated), Vec::new());
        assert_eq!(mtp.sequence, 0);

        // The stream is still usable afterwards.
        let update = [0x40, 0x42, 0xae, 0x74];
        assert_eq!(
            receive(&mut mtp, 1, &update),
            vec![Deserialization::Update(update.to_vec())]
        );
    }

    #[test]
    fn updates_are_forwarded_and_acked() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let update = [0x40, 0x42, 0xae, 0x74, 0, 0, 0, 0];
        let msg_id = server_msg_id(0, 7);

        assert_eq!(
            receive_with_id(&mut mtp, msg_id, 1, &update),
            vec![Deserialization::Update(update.to_vec())]
        );
        assert!(mtp.has_pending_acks());

        let mut buffer = Vec::new();
        mtp.push(&mut buffer, REQUEST).unwrap();
        let container = mtp.finalize_plain(&mut buffer).unwrap();
        let container = MessageContainer::from_bytes(&container.body).unwrap();

        assert_eq!(container.messages.len(), 2);
        assert_eq!(
            types::MsgsAck::from_bytes(&container.messages[0].body).unwrap(),
            types::MsgsAck {
                msg_ids: vec![msg_id]
            }
        );
        // acks are not content-related
        assert_eq!(container.messages[0].seq_no % 2, 0);
        assert_eq!(container.messages[1].body, REQUEST);
    }

    #[test]
    fn rpc_results_and_errors() {
        let mut mtp = Encrypted::build().finish(auth_key());

        let result = tl::RpcResult {
            req_msg_id: 1234,
            result: vec![1, 2, 3, 4],
        };
        assert_eq!(
            receive(&mut mtp, 1, &result.to_bytes()),
            vec![Deserialization::RpcResult(RpcResult {
                msg_id: MsgId(1234),
                body: vec![1, 2, 3, 4],
            })]
        );

        let error = types::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_31".to_string(),
        };
        let result = tl::RpcResult {
            req_msg_id: 1238,
            result: error.to_bytes(),
        };
        assert_eq!(
            receive(&mut mtp, 3, &result.to_bytes()),
            vec![Deserialization::RpcError(RpcResultError {
                msg_id: MsgId(1238),
                error,
            })]
        );
    }

    #[test]
    fn packed_results_are_inflated() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let body = vec![0x11; 4096];
        let result = tl::RpcResult {
            req_msg_id: 1234,
            result: GzipPacked::new(&body).unwrap().to_bytes(),
        };

        assert_eq!(
            receive(&mut mtp, 1, &result.to_bytes()),
            vec![Deserialization::RpcResult(RpcResult {
                msg_id: MsgId(1234),
                body,
            })]
        );
    }

    #[test]
    fn broken_result_fails_only_its_call() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let result = tl::RpcResult {
            req_msg_id: 1234,
            result: vec![],
        };
        assert_eq!(
            receive(&mut mtp, 1, &result.to_bytes()),
            vec![Deserialization::Failure(DeserializationFailure {
                msg_id: MsgId(1234),
                error: DeserializeError::MessageBufferTooSmall,
            })]
        );
    }

    #[test]
    fn containers_are_dispatched_in_order() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let container = MessageContainer {
            messages: vec![
                Message {
                    msg_id: server_msg_id(0, 2),
                    seq_no: 2,
                    body: types::MsgsAck {
                        msg_ids: vec![100, 104],
                    }
                    .to_bytes(),
                },
                Message {
                    msg_id: server_msg_id(0, 3),
                    seq_no: 3,
                    body: types::Pong {
                        msg_id: 108,
                        ping_id: 5,
                    }
                    .to_bytes(),
                },
            ],
        };

        let results = receive(&mut mtp, 4, &container.to_bytes());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Deserialization::Acknowledged(MsgId(100)));
        assert_eq!(results[1], Deserialization::Acknowledged(MsgId(104)));
        assert!(matches!(
            &results[2],
            Deserialization::RpcResult(RpcResult { msg_id: MsgId(108), .. })
        ));
    }

    #[test]
    fn bad_server_salt_is_applied() {
        let mut mtp = Encrypted::build().first_salt(1).finish(auth_key());
        let bad = types::BadServerSalt {
            bad_msg_id: 1000,
            bad_msg_seqno: 1,
            error_code: 48,
            new_server_salt: 0x0102030405060708,
        };

        assert_eq!(
            receive(&mut mtp, 2, &bad.to_bytes()),
            vec![Deserialization::BadMessage(BadMessage {
                msg_id: MsgId(1000),
                code: 48,
            })]
        );
        assert_eq!(mtp.salt(), 0x0102030405060708);
    }

    #[test]
    fn bad_msg_id_corrects_time_offset() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let bad = types::BadMsgNotification {
            bad_msg_id: 1000,
            bad_msg_seqno: 1,
            error_code: 16,
        };

        receive_with_id(&mut mtp, server_msg_id(1000, 1), 2, &bad.to_bytes());
        assert!((999..=1001).contains(&mtp.time_offset()));

        let mut buffer = Vec::new();
        let msg_id = mtp.push(&mut buffer, REQUEST).unwrap();
        let now = utils::since_epoch().as_secs() as i64;
        assert!((msg_id.0 >> 32) - now >= 999);
    }

    #[test]
    fn bad_seq_no_is_corrected() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let bad = |code| types::BadMsgNotification {
            bad_msg_id: 1000,
            bad_msg_seqno: 1,
            error_code: code,
        };

        receive(&mut mtp, 2, &bad(32).to_bytes());
        let mut buffer = Vec::new();
        mtp.push(&mut buffer, REQUEST).unwrap();
        assert_eq!(mtp.finalize_plain(&mut buffer).unwrap().seq_no, 129);

        receive(&mut mtp, 2, &bad(33).to_bytes());
        mtp.push(&mut buffer, REQUEST).unwrap();
        assert_eq!(mtp.finalize_plain(&mut buffer).unwrap().seq_no, 99);
    }

    #[test]
    fn new_session_updates_salt() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let created = types::NewSessionCreated {
            first_msg_id: 4000,
            unique_id: 1,
            server_salt: 99,
        };

        assert_eq!(
            receive(&mut mtp, 1, &created.to_bytes()),
            vec![Deserialization::NewSession {
                first_msg_id: MsgId(4000)
            }]
        );
        assert_eq!(mtp.salt(), 99);
    }

    #[test]
    fn state_requests_are_answered() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let msg_id = server_msg_id(0, 9);
        let request = types::MsgsStateReq {
            msg_ids: vec![4, 8, 12],
        };

        assert_eq!(receive_with_id(&mut mtp, msg_id, 1, &request.to_bytes()), Vec::new());
        assert!(mtp.has_pending_replies());

        let messages = sent_messages(&mut mtp);
        let info = messages
            .iter()
            .find_map(|m| types::MsgsStateInfo::from_bytes(&m.body).ok())
            .unwrap();
        assert_eq!(
            info,
            types::MsgsStateInfo {
                req_msg_id: msg_id,
                info: vec![1, 1, 1],
            }
        );
        assert!(!mtp.has_pending_replies());
    }

    #[test]
    fn new_detailed_info_acks_known_answers() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let known = server_msg_id(0, 3);
        receive_with_id(&mut mtp, known, 2, &types::MsgsAck { msg_ids: vec![] }.to_bytes());

        let info = |answer_msg_id| types::MsgNewDetailedInfo {
            answer_msg_id,
            bytes: 100,
            status: 0,
        };

        receive_with_id(&mut mtp, server_msg_id(0, 4), 2, &info(known).to_bytes());
        assert!(mtp.has_pending_acks());
        assert!(!mtp.has_pending_replies());

        let unknown = server_msg_id(-10, 1);
        receive_with_id(&mut mtp, server_msg_id(0, 5), 2, &info(unknown).to_bytes());
        assert!(mtp.has_pending_replies());

        let messages = sent_messages(&mut mtp);
        assert!(messages.iter().any(|m| {
            types::MsgResendReq::from_bytes(&m.body)
                == Ok(types::MsgResendReq {
                    msg_ids: vec![unknown],
                })
        }));
    }

    #[test]
    fn recent_inbound_is_bounded() {
        let mut mtp = Encrypted::build().finish(auth_key());
        for n in 0..(RECENT_INBOUND_LEN as i64 + 10) {
            receive_with_id(&mut mtp, server_msg_id(0, n), 2, &types::MsgsAck { msg_ids: vec![] }.to_bytes());
        }
        assert_eq!(mtp.recent_inbound.len(), RECENT_INBOUND_LEN);
        assert!(!mtp.recent_inbound.contains(&server_msg_id(0, 0)));
    }

    #[test]
    fn reset_starts_new_session() {
        let mut mtp = Encrypted::build().finish(auth_key());
        let session_id = mtp.session().session_id();
        receive(&mut mtp, 1, &[0x40, 0x42, 0xae, 0x74]);

        mtp.reset();
        assert_ne!(mtp.session().session_id(), session_id);
        assert!(!mtp.has_pending_acks());
        assert!(mtp.auth_key().is_some());
    }
}

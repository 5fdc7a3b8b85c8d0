// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BytesMut};
use mtwire_crypto::{AuthKey, Side};
use mtwire_mtproto::session::Session;
use mtwire_mtproto::tl::{
    self, Deserializable, Identifiable, Message, MessageContainer, Serializable, functions, types,
};
use mtwire_mtproto::transport::{self, Transport};
use mtwire_mtsender::{
    Connection, ConnectionError, ConnectionHandle, ConnectionParams, Connector, FixedReconnect,
    InvocationError, MAXIMUM_DATA, MemoryStorage, NoReconnect, Storage,
};
use simple_logger::SimpleLogger;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime;
use tokio::sync::mpsc;

const DC_ID: i32 = 2;

/// An arbitrary call, answered with `boolTrue`.
const CALL: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 1, 0, 0, 0];
const BOOL_TRUE: [u8; 4] = [0xb5, 0x75, 0x72, 0x99];

fn auth_key() -> [u8; 256] {
    let mut key = [0; 256];
    key.iter_mut()
        .enumerate()
        .for_each(|(i, x)| *x = (i * 7 + 3) as u8);
    key
}

fn run<F: Future<Output = ()>>(paused: bool, test: F) {
    let _ = SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();

    let rt = runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(paused)
        .build()
        .unwrap();
    rt.block_on(test);
}

/// Hands out in-memory streams, sending the other end to the test.
struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
}

impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(2 * MAXIMUM_DATA);
        self.servers
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no server"))?;
        Ok(client)
    }
}

/// The server end of a single stream, speaking the full transport.
struct Server {
    stream: DuplexStream,
    transport: transport::Full,
    session: Session,
    buffer: BytesMut,
    adopted: bool,
    last_msg_id: i64,
    sequence: i32,
}

impl Server {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            transport: transport::Full::new(),
            session: Session::with_key(AuthKey::from_bytes(auth_key()), Side::Server),
            buffer: BytesMut::new(),
            adopted: false,
            last_msg_id: 0,
            sequence: 0,
        }
    }

    async fn read_frame(&mut self) -> Vec<u8> {
        loop {
            let mut payload = BytesMut::new();
            match self.transport.unpack(&self.buffer, &mut payload) {
                Ok(n) => {
                    self.buffer.advance(n);
                    return payload.to_vec();
                }
                Err(transport::Error::MissingBytes) => {
                    let n = self.stream.read_buf(&mut self.buffer).await.unwrap();
                    assert_ne!(n, 0, "client closed the stream");
                }
                Err(e) => panic!("client sent a bad frame: {e}"),
            }
        }
    }

    /// The messages of the next payload, with containers flattened.
    async fn recv(&mut self) -> Vec<Message> {
        let frame = self.read_frame().await;
        if !self.adopted {
            let inner = mtwire_crypto::decrypt_data_v2(
                &frame,
                &AuthKey::from_bytes(auth_key()),
                Side::Client,
            )
            .unwrap();
            self.session
                .set_session_id(i64::from_le_bytes(inner[8..16].try_into().unwrap()));
            self.adopted = true;
        }

        let message = self.session.decrypt(&frame).expect("frame should decrypt");
        let message = Message {
            msg_id: message.msg_id,
            seq_no: message.seq_no,
            body: message.body,
        };
        if message.constructor_id() == Ok(MessageContainer::CONSTRUCTOR_ID) {
            MessageContainer::from_bytes(&message.body)
                .unwrap()
                .messages
        } else {
            vec![message]
        }
    }

    /// The next message that is not an acknowledgement.
    async fn recv_call(&mut self) -> Message {
        loop {
            if let Some(message) = self
                .recv()
                .await
                .into_iter()
                .find(|m| m.constructor_id() != Ok(types::MsgsAck::CONSTRUCTOR_ID))
            {
                return message;
            }
        }
    }

    /// Like [`Self::recv`], for a salt check.
    async fn recv_with_salt(&mut self) -> (i64, Message) {
        let frame = self.read_frame().await;
        let message = self.session.decrypt(&frame).expect("frame should decrypt");
        let salt = message.salt;
        (
            salt,
            Message {
                msg_id: message.msg_id,
                seq_no: message.seq_no,
                body: message.body,
            },
        )
    }

    fn next_msg_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let mut msg_id = (now << 32) | 1;
        if msg_id <= self.last_msg_id {
            msg_id = self.last_msg_id + 4;
        }
        self.last_msg_id = msg_id;
        msg_id
    }

    async fn send(&mut self, body: &[u8], content_related: bool) -> i64 {
        let msg_id = self.next_msg_id();
        let seq_no = if content_related {
            self.sequence += 1;
            self.sequence * 2 - 1
        } else {
            self.sequence * 2
        };
        let frame = self.session.encrypt(body, msg_id, seq_no).unwrap();
        let mut packed = BytesMut::new();
        self.transport.pack(&frame, &mut packed);
        self.stream.write_all(&packed).await.unwrap();
        msg_id
    }

    async fn reply(&mut self, req_msg_id: i64, result: &[u8]) {
        let body = tl::RpcResult {
            req_msg_id,
            result: result.to_vec(),
        }
        .to_bytes();
        self.send(&body, true).await;
    }

    async fn send_status(&mut self, status: i32) {
        self.stream.write_all(&status.to_le_bytes()).await.unwrap();
    }
}

/// The query inside `invokeWithLayer(initConnection(...))`, if wrapped.
fn unwrap_init(body: &[u8]) -> Option<Vec<u8>> {
    let outer = functions::InvokeWithLayer::from_bytes(body).ok()?;
    assert_eq!(outer.layer, tl::LAYER);
    let inner = functions::InitConnection::from_bytes(&outer.query).ok()?;
    Some(inner.query)
}

struct Harness {
    handle: ConnectionHandle,
    servers: mpsc::UnboundedReceiver<DuplexStream>,
    updates: mpsc::UnboundedReceiver<Vec<u8>>,
    key_changes: mpsc::UnboundedReceiver<Option<[u8; 256]>>,
    errors: mpsc::UnboundedReceiver<ConnectionError>,
    storage: Arc<MemoryStorage>,
}

impl Harness {
    /// Starts a connection whose key the server already knows.
    fn start(params: ConnectionParams) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_auth_key(DC_ID, Some(auth_key()));
        Self::with_storage(params, storage)
    }

    /// Starts a connection that has to generate its key first.
    fn start_without_key(params: ConnectionParams) -> Self {
        Self::with_storage(params, Arc::new(MemoryStorage::new()))
    }

    fn with_storage(params: ConnectionParams, storage: Arc<MemoryStorage>) -> Self {
        let (servers_tx, servers) = mpsc::unbounded_channel();
        let connection = Connection::with_configuration(
            DuplexConnector {
                servers: servers_tx,
            },
            transport::Full::new,
            Arc::clone(&storage) as Arc<dyn Storage>,
            DC_ID,
            params,
        );
        tokio::spawn(connection.runner.run());

        Self {
            handle: connection.handle,
            servers,
            updates: connection.updates,
            key_changes: connection.key_changes,
            errors: connection.errors,
            storage,
        }
    }

    async fn accept(&mut self) -> Server {
        Server::new(self.servers.recv().await.expect("client should connect"))
    }

    fn invoke(
        &self,
        body: &[u8],
        timeout: Option<Duration>,
    ) -> tokio::task::JoinHandle<Result<Vec<u8>, InvocationError>> {
        let handle = self.handle.clone();
        let body = body.to_vec();
        tokio::spawn(async move { handle.invoke(body, timeout).await })
    }
}

fn params() -> ConnectionParams {
    ConnectionParams {
        api_id: 1,
        reconnection_policy: Arc::new(NoReconnect),
        ..Default::default()
    }
}

#[test]
fn first_call_is_wrapped_in_init_connection() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let first = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(message.seq_no % 2, 1);
        assert_eq!(unwrap_init(&message.body), Some(CALL.to_vec()));
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert_eq!(first.await.unwrap().unwrap(), BOOL_TRUE);

        let second = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(message.body, CALL);
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert_eq!(second.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn calls_wait_for_init_connection() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let first = harness.invoke(&CALL, None);
        let wrapped = server.recv_call().await;
        assert!(unwrap_init(&wrapped.body).is_some());

        let second = harness.invoke(&[0x55, 0x66, 0x77, 0x88], None);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), server.recv_call())
                .await
                .is_err()
        );

        server.reply(wrapped.msg_id, &BOOL_TRUE).await;
        assert_eq!(first.await.unwrap().unwrap(), BOOL_TRUE);

        let message = server.recv_call().await;
        assert_eq!(message.body, [0x55, 0x66, 0x77, 0x88]);
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert!(second.await.unwrap().is_ok());
    });
}

#[test]
fn rpc_errors_name_their_cause() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let error = types::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_31".into(),
        };
        server.reply(message.msg_id, &error.to_bytes()).await;

        match call.await.unwrap() {
            Err(InvocationError::Rpc(error)) => {
                assert_eq!(error.code, 420);
                assert_eq!(error.name, "FLOOD_WAIT");
                assert_eq!(error.value, Some(31));
                assert_eq!(error.caused_by, Some(0x44332211));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // Even failed, the wrapped call told the server who we are.
        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(message.body, CALL);
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert!(call.await.unwrap().is_ok());
    });
}

#[test]
fn updates_are_forwarded_and_acknowledged() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        server.reply(message.msg_id, &BOOL_TRUE).await;
        call.await.unwrap().unwrap();

        let update = [0x78, 0x56, 0x34, 0x12];
        let update_id = server.send(&update, true).await;
        assert_eq!(harness.updates.recv().await.unwrap(), update);

        // Nothing else is sent, so the acknowledgements go out on their own.
        let acks = loop {
            let messages = server.recv().await;
            if let Some(ack) = messages
                .iter()
                .find_map(|m| types::MsgsAck::from_bytes(&m.body).ok())
            {
                break ack;
            }
        };
        assert!(acks.msg_ids.contains(&update_id));
    });
}

#[test]
fn bad_server_salt_resends_with_new_salt() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let bad = types::BadServerSalt {
            bad_msg_id: message.msg_id,
            bad_msg_seqno: message.seq_no,
            error_code: 48,
            new_server_salt: 0x1234,
        };
        server.send(&bad.to_bytes(), false).await;

        let (salt, resent) = server.recv_with_salt().await;
        assert_eq!(salt, 0x1234);
        assert_ne!(resent.msg_id, message.msg_id);
        assert_eq!(unwrap_init(&resent.body), Some(CALL.to_vec()));
        server.reply(resent.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn unrecoverable_bad_message_fails_call() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let bad = types::BadMsgNotification {
            bad_msg_id: message.msg_id,
            bad_msg_seqno: message.seq_no,
            error_code: 20,
        };
        server.send(&bad.to_bytes(), false).await;

        assert!(matches!(
            call.await.unwrap(),
            Err(InvocationError::BadMessage { code: 20 })
        ));
    });
}

#[test]
fn log_out_is_answered_by_its_acknowledgement() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let log_out = functions::AUTH_LOG_OUT_ID.to_le_bytes();
        let call = harness.invoke(&log_out, None);
        let message = server.recv_call().await;
        let ack = types::MsgsAck {
            msg_ids: vec![message.msg_id],
        };
        server.send(&ack.to_bytes(), false).await;

        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn pending_answer_is_requested_again() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let _call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let info = types::MsgDetailedInfo {
            msg_id: message.msg_id,
            answer_msg_id: 0x7777_0001,
            bytes: 16,
            status: 0,
        };
        server.send(&info.to_bytes(), true).await;

        let request = loop {
            if let Some(request) = server
                .recv()
                .await
                .iter()
                .find_map(|m| types::MsgResendReq::from_bytes(&m.body).ok())
            {
                break request;
            }
        };
        assert_eq!(request.msg_ids, vec![0x7777_0001]);
    });
}

#[test]
fn timed_out_call_is_dropped() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, Some(Duration::from_millis(100)));
        let wrapped = server.recv_call().await;
        assert!(unwrap_init(&wrapped.body).is_some());
        assert!(matches!(call.await.unwrap(), Err(InvocationError::Timeout)));

        // Its answer never came, so the next call must carry initConnection.
        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(unwrap_init(&message.body), Some(CALL.to_vec()));

        // A late answer to the dropped call is ignored.
        server.reply(wrapped.msg_id, &BOOL_TRUE).await;
        server.reply(message.msg_id, &[0x01, 0x02, 0x03, 0x04]).await;
        assert_eq!(call.await.unwrap().unwrap(), [0x01, 0x02, 0x03, 0x04]);
    });
}

#[test]
fn oversized_call_is_rejected() {
    run(false, async {
        let harness = Harness::start(params());
        let body = vec![0; MAXIMUM_DATA + 4];
        assert!(matches!(
            harness.handle.invoke(body, None).await,
            Err(InvocationError::PayloadTooLarge { size }) if size == MAXIMUM_DATA + 4
        ));
    });
}

#[test]
fn lost_stream_is_reopened_and_calls_resent() {
    run(false, async {
        let mut harness = Harness::start(ConnectionParams {
            reconnection_policy: Arc::new(FixedReconnect {
                attempts: 1,
                delay: Duration::from_millis(10),
            }),
            ..params()
        });
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        server.recv_call().await;
        drop(server);

        assert!(matches!(
            harness.errors.recv().await,
            Some(ConnectionError::Read(_))
        ));

        let mut server = harness.accept().await;
        let message = server.recv_call().await;
        assert_eq!(unwrap_init(&message.body), Some(CALL.to_vec()));
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn calls_fail_once_reconnecting_is_given_up() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        server.recv_call().await;
        drop(server);

        match call.await.unwrap() {
            Err(InvocationError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            harness.handle.invoke(CALL.to_vec(), None).await,
            Err(InvocationError::Dropped)
        ));
    });
}

#[test]
fn forgotten_key_is_replaced() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let _call = harness.invoke(&CALL, None);
        server.recv_call().await;
        server.send_status(-404).await;

        assert_eq!(harness.key_changes.recv().await, Some(None));
        assert_eq!(harness.storage.auth_key(DC_ID), None);

        // A new stream starts the key exchange in plain text.
        let mut server = harness.accept().await;
        let frame = server.read_frame().await;
        assert_eq!(&frame[..8], &[0; 8]);
        assert_eq!(
            u32::from_le_bytes(frame[20..24].try_into().unwrap()),
            functions::ReqPqMulti::CONSTRUCTOR_ID
        );
    });
}

#[test]
fn quit_drops_pending_calls() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        server.recv_call().await;
        assert!(harness.handle.quit());

        assert!(matches!(call.await.unwrap(), Err(InvocationError::Dropped)));
    });
}

#[test]
fn unanswered_ping_closes_the_stream() {
    run(true, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let message = server.recv_call().await;
        let ping = functions::PingDelayDisconnect::from_bytes(&message.body).unwrap();
        assert_eq!(ping.disconnect_delay, 75);

        match harness.errors.recv().await {
            Some(ConnectionError::Read(mtwire_mtsender::ReadError::Io(e))) => {
                assert_eq!(e.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    });
}

#[test]
fn answered_ping_keeps_the_stream() {
    run(true, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        for _ in 0..3 {
            let message = server.recv_call().await;
            let ping = functions::PingDelayDisconnect::from_bytes(&message.body).unwrap();
            let pong = types::Pong {
                msg_id: message.msg_id,
                ping_id: ping.ping_id,
            };
            server.send(&pong.to_bytes(), false).await;
        }
        assert!(harness.errors.try_recv().is_err());
    });
}

#[test]
fn calls_made_during_key_exchange_go_out_in_order() {
    run(false, async {
        let mut harness = Harness::start_without_key(ConnectionParams {
            reconnection_policy: Arc::new(FixedReconnect {
                attempts: 2,
                delay: Duration::from_millis(10),
            }),
            ..params()
        });

        let mut server = harness.accept().await;
        let frame = server.read_frame().await;
        assert_eq!(
            u32::from_le_bytes(frame[20..24].try_into().unwrap()),
            functions::ReqPqMulti::CONSTRUCTOR_ID
        );

        let first = harness.invoke(&CALL, None);
        tokio::task::yield_now().await;
        let second = harness.invoke(&[0x55, 0x66, 0x77, 0x88], None);

        // The exchange is cut short, but a key shows up in storage meanwhile,
        // so the next stream starts out encrypted.
        harness.storage.set_auth_key(DC_ID, Some(auth_key()));
        drop(server);

        let mut server = harness.accept().await;
        let message = server.recv_call().await;
        assert_eq!(unwrap_init(&message.body), Some(CALL.to_vec()));
        server.reply(message.msg_id, &BOOL_TRUE).await;

        let message = server.recv_call().await;
        assert_eq!(message.body, [0x55, 0x66, 0x77, 0x88]);
        server.reply(message.msg_id, &[0x01, 0x02, 0x03, 0x04]).await;

        assert_eq!(first.await.unwrap().unwrap(), BOOL_TRUE);
        assert_eq!(second.await.unwrap().unwrap(), [0x01, 0x02, 0x03, 0x04]);
    });
}

#[test]
fn bad_seq_no_resends_call() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let bad = types::BadMsgNotification {
            bad_msg_id: message.msg_id,
            bad_msg_seqno: message.seq_no,
            error_code: 32,
        };
        server.send(&bad.to_bytes(), false).await;

        let resent = server.recv_call().await;
        assert_ne!(resent.msg_id, message.msg_id);
        assert!(resent.seq_no >= message.seq_no + 128);
        assert_eq!(unwrap_init(&resent.body), Some(CALL.to_vec()));
        server.reply(resent.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn new_session_resends_only_older_calls() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        server.reply(message.msg_id, &BOOL_TRUE).await;
        call.await.unwrap().unwrap();

        let older = harness.invoke(&CALL, None);
        let older_message = server.recv_call().await;
        let newer = harness.invoke(&[0x55, 0x66, 0x77, 0x88], None);
        let newer_message = server.recv_call().await;
        assert!(older_message.msg_id < newer_message.msg_id);

        let created = types::NewSessionCreated {
            first_msg_id: newer_message.msg_id,
            unique_id: 1,
            server_salt: 0x4321,
        };
        server.send(&created.to_bytes(), true).await;

        let resent = server.recv_call().await;
        assert_eq!(resent.body, CALL);
        assert_ne!(resent.msg_id, older_message.msg_id);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), server.recv_call())
                .await
                .is_err()
        );

        server.reply(newer_message.msg_id, &[0x01, 0x02, 0x03, 0x04]).await;
        server.reply(resent.msg_id, &BOOL_TRUE).await;
        assert_eq!(newer.await.unwrap().unwrap(), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(older.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn answer_to_message_rejected_for_salt_is_ignored() {
    run(false, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        let bad = types::BadServerSalt {
            bad_msg_id: message.msg_id,
            bad_msg_seqno: message.seq_no,
            error_code: 48,
            new_server_salt: 0x1234,
        };
        server.send(&bad.to_bytes(), false).await;
        let resent = server.recv_call().await;

        server.reply(message.msg_id, &[0x01, 0x02, 0x03, 0x04]).await;
        server.reply(resent.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(message.body, CALL);
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

#[test]
fn flood_status_still_asks_the_policy() {
    run(true, async {
        let mut harness = Harness::start(params());
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        server.recv_call().await;
        server.send_status(-429).await;

        assert!(matches!(
            call.await.unwrap(),
            Err(InvocationError::Transport(transport::Error::BadStatus { status: 429 }))
        ));
        assert!(matches!(
            harness.handle.invoke(CALL.to_vec(), None).await,
            Err(InvocationError::Dropped)
        ));
        assert!(harness.servers.try_recv().is_err());
    });
}

#[test]
fn call_too_large_for_init_connection_is_sent_bare() {
    run(false, async {
        let mut harness = Harness::start(ConnectionParams {
            device_model: "x".repeat(MAXIMUM_DATA),
            ..params()
        });
        let mut server = harness.accept().await;

        let call = harness.invoke(&CALL, None);
        let message = server.recv_call().await;
        assert_eq!(message.body, CALL);
        server.reply(message.msg_id, &BOOL_TRUE).await;
        assert_eq!(call.await.unwrap().unwrap(), BOOL_TRUE);
    });
}

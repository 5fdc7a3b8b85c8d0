// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::SystemTime;

use bytes::{Buf, BytesMut};
use log::{debug, info, trace, warn};
use mtwire_crypto::AuthKey;
use mtwire_mtproto::mtp::{
    self, BadMessage, Deserialization, DeserializationFailure, Mtp, RpcResult, RpcResultError,
};
use mtwire_mtproto::tl::{
    self, Deserializable, Message, MessageContainer, RemoteCall, Serializable,
};
use mtwire_mtproto::transport::{self, Transport};
use mtwire_mtproto::{MsgId, authentication};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{Instant, sleep_until};

use crate::configuration::ConnectionParams;
use crate::errors::{InvocationError, ReadError, RpcError};

/// The largest serialized call that will be sent.
///
/// Anything bigger would not fit in a single message once the protocol
/// and transport overhead is added, and the server would refuse it.
pub const MAXIMUM_DATA: usize = 1_044_404;

/// After how many seconds should the server close the connection when we send a ping?
///
/// What this value essentially means is that we have `NO_PING_DISCONNECT - ping_interval`
/// seconds to keep sending pings, or the server will close the connection.
const NO_PING_DISCONNECT: i32 = 75;

/// Generate a "random" ping ID.
pub(crate) fn generate_random_id() -> i64 {
    static LAST_ID: AtomicI64 = AtomicI64::new(0);

    while LAST_ID.load(Ordering::SeqCst) == 0 {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;

        if LAST_ID
            .compare_exchange(0, now.max(1), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            thread::yield_now();
        }
    }

    LAST_ID.fetch_add(1, Ordering::SeqCst)
}

pub(crate) type ResultSender = oneshot::Sender<Result<Vec<u8>, InvocationError>>;

/// Manages enqueuing requests, matching them to their response, and IO.
pub struct Sender<T: Transport, M: Mtp, S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    transport: T,
    mtp: M,
    params: Option<ConnectionParams>,
    requests: Vec<Request>,
    init: InitState,

    next_ping: Option<Instant>,
    ping: Option<oneshot::Receiver<Result<Vec<u8>, InvocationError>>>,
    ack_deadline: Option<Instant>,
    /// Whether anything valid arrived through this stream.
    received: bool,

    // Transport-level buffers and positions
    read_buffer: BytesMut,
    unpacked: BytesMut,
    mtp_buffer: Vec<u8>,
    write_buffer: BytesMut,
    write_head: usize,
}

pub(crate) struct Request {
    body: Vec<u8>,
    kind: RequestKind,
    state: RequestState,
    result: ResultSender,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RequestKind {
    Call,
    /// A call that went out wrapped in `initConnection`.
    InitConnection,
    Ping,
}

#[derive(Clone, Debug)]
struct MsgIdPair {
    msg_id: MsgId,
    container_msg_id: MsgId,
}

enum RequestState {
    NotSerialized,
    Serialized(MsgIdPair),
    Sent(MsgIdPair),
}

/// Progress of the `initConnection` handshake of the current connection.
#[derive(Clone, Copy, Debug, PartialEq)]
enum InitState {
    /// Plain connections never announce themselves.
    Disabled,
    /// The next call must be wrapped.
    Needed,
    /// A wrapped call is in flight, and the rest wait for it.
    Waiting,
    Done,
}

impl MsgIdPair {
    fn new(msg_id: MsgId) -> Self {
        Self {
            msg_id,
            container_msg_id: msg_id, // by default, no container (so the last msg_id is itself)
        }
    }

    fn matches(&self, msg_id: MsgId) -> bool {
        self.msg_id == msg_id || self.container_msg_id == msg_id
    }
}

impl Request {
    fn constructor_id(&self) -> u32 {
        u32::from_le_bytes([self.body[0], self.body[1], self.body[2], self.body[3]])
    }

    pub(crate) fn fail(self, error: InvocationError) {
        drop(self.result.send(Err(error)));
    }

    fn pair(&self) -> Option<&MsgIdPair> {
        match &self.state {
            RequestState::NotSerialized => None,
            RequestState::Serialized(pair) | RequestState::Sent(pair) => Some(pair),
        }
    }
}

impl<T, M, S> Sender<T, M, S>
where
    T: Transport,
    M: Mtp,
    S: AsyncRead + AsyncWrite,
{
    /// Wraps an open stream.
    ///
    /// With `params`, keep-alive pings are scheduled, acknowledgements are
    /// batched, and the first call is wrapped in `initConnection`. Without,
    /// the sender only exchanges plain request and response pairs.
    pub fn new(stream: S, mut transport: T, mtp: M, params: Option<ConnectionParams>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        transport.reset();
        let now = Instant::now();

        Self {
            reader,
            writer,
            transport,
            mtp,
            next_ping: params.as_ref().map(|p| now + p.ping_interval),
            init: if params.is_some() {
                InitState::Needed
            } else {
                InitState::Disabled
            },
            params,
            requests: Vec::new(),
            ping: None,
            ack_deadline: None,
            received: false,

            read_buffer: BytesMut::with_capacity(MAXIMUM_DATA),
            unpacked: BytesMut::new(),
            mtp_buffer: Vec::new(),
            write_buffer: BytesMut::with_capacity(MAXIMUM_DATA),
            write_head: 0,
        }
    }

    /// Serializes the given request, enqueues it to the internal buffer,
    /// and repeatedly calls [`Self::step`] until a response for it is received.
    pub async fn invoke<R: RemoteCall>(
        &mut self,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        let body = self.send(request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Like [`Self::invoke`], for calls that are already serialized.
    pub async fn send(&mut self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        if body.len() > MAXIMUM_DATA {
            return Err(InvocationError::PayloadTooLarge { size: body.len() });
        }
        let (tx, rx) = oneshot::channel();
        self.enqueue_body(body, tx);
        self.step_until_receive(rx).await
    }

    pub(crate) fn enqueue_body(&mut self, body: Vec<u8>, tx: ResultSender) {
        self.enqueue(body, RequestKind::Call, tx)
    }

    fn enqueue(&mut self, body: Vec<u8>, kind: RequestKind, tx: ResultSender) {
        assert!(body.len() >= 4 && body.len() % 4 == 0);
        let request = Request {
            body,
            kind,
            state: RequestState::NotSerialized,
            result: tx,
        };
        debug!(
            "enqueueing request {:08x} to be serialized",
            request.constructor_id()
        );
        self.requests.push(request);
    }

    async fn step_until_receive(
        &mut self,
        mut rx: oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
    ) -> Result<Vec<u8>, InvocationError> {
        loop {
            self.step().await?;
            match rx.try_recv() {
                Ok(x) => break x,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Closed) => break Err(InvocationError::Dropped),
            }
        }
    }

    /// Step network events, writing and reading at the same time.
    ///
    /// Unsolicited messages received during this step, if any, are returned.
    ///
    /// If an error is returned, the stream should be treated as dead.
    /// The pending requests survive, and can be moved to a new stream.
    pub async fn step(&mut self) -> Result<Vec<Vec<u8>>, ReadError> {
        self.try_fill_write();
        let write_len = self.write_buffer.len() - self.write_head;
        trace!(
            "reading bytes and sending up to {} bytes via network",
            write_len
        );

        let next_ping = self.next_ping;
        let ack_deadline = self.ack_deadline;
        self.read_buffer.reserve(4096);

        tokio::select! {
            n = self.reader.read_buf(&mut self.read_buffer) => {
                n.map_err(ReadError::Io).and_then(|n| self.on_net_read(n))
            }
            n = self.writer.write(&self.write_buffer[self.write_head..]), if write_len > 0 => {
                n.map_err(ReadError::Io).and_then(|n| self.on_net_write(n)).map(|()| Vec::new())
            }
            _ = sleep_until(next_ping.unwrap_or_else(Instant::now)), if next_ping.is_some() => {
                self.on_ping_timeout().map(|()| Vec::new())
            }
            _ = sleep_until(ack_deadline.unwrap_or_else(Instant::now)), if ack_deadline.is_some() && write_len == 0 => {
                trace!("acknowledgement delay elapsed");
                Ok(Vec::new())
            }
        }
    }

    /// Setup the write buffer for the transport, unless a write is already pending.
    fn try_fill_write(&mut self) {
        if !self.write_buffer.is_empty() {
            return;
        }

        let mut pushed = false;
        for request in self
            .requests
            .iter_mut()
            .filter(|r| matches!(r.state, RequestState::NotSerialized))
        {
            // Queries too close to the limit are sent without `initConnection`.
            let wrapped = match (request.kind, self.init, &self.params) {
                // Calls wait until the server has seen who we are.
                (RequestKind::Call, InitState::Waiting, _) => continue,
                (RequestKind::Call, InitState::Needed, Some(params)) => {
                    let body = params.init_connection(&request.body);
                    (body.len() + Message::SIZE_OVERHEAD <= MessageContainer::MAXIMUM_SIZE)
                        .then_some(body)
                }
                _ => None,
            };
            let wrap = wrapped.is_some();
            let msg_id = self.mtp.push(
                &mut self.mtp_buffer,
                wrapped.as_deref().unwrap_or(request.body.as_slice()),
            );

            let Some(msg_id) = msg_id else {
                break;
            };
            debug!(
                "serialized request {:08x} with {:?}{}",
                request.constructor_id(),
                msg_id,
                if wrap { " inside initConnection" } else { "" }
            );
            if wrap {
                request.kind = RequestKind::InitConnection;
                self.init = InitState::Waiting;
            }
            // Note how only NotSerialized become Serialized.
            request.state = RequestState::Serialized(MsgIdPair::new(msg_id));
            pushed = true;
        }

        let acks_due = self
            .ack_deadline
            .is_some_and(|deadline| deadline <= Instant::now());
        if !pushed && !acks_due && !self.mtp.has_pending_replies() {
            return;
        }

        if let Some(container_msg_id) = self.mtp.finalize(&mut self.mtp_buffer) {
            for request in self.requests.iter_mut() {
                if let RequestState::Serialized(ref mut pair) = request.state {
                    pair.container_msg_id = container_msg_id;
                }
            }
            self.transport.pack(&self.mtp_buffer, &mut self.write_buffer);
            // Whatever acknowledgements were pending went along.
            self.ack_deadline = None;
        }
        self.mtp_buffer.clear();
    }

    /// Handle `n` more read bytes being ready to process by the transport.
    fn on_net_read(&mut self, n: usize) -> Result<Vec<Vec<u8>>, ReadError> {
        if n == 0 {
            return Err(ReadError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "read 0 bytes",
            )));
        }

        trace!("read {} bytes from the network", n);
        trace!("trying to unpack buffer of {} bytes...", self.read_buffer.len());

        let mut updates = Vec::new();
        loop {
            self.unpacked.clear();
            match self.transport.unpack(&self.read_buffer, &mut self.unpacked) {
                Ok(consumed) => {
                    self.read_buffer.advance(consumed);
                    self.received = true;
                    debug!("deserializing valid transport packet...");
                    let results = self.mtp.deserialize(&self.unpacked)?;
                    self.process_mtp_buffer(results, &mut updates);
                }
                Err(transport::Error::MissingBytes) => break,
                Err(err) => return Err(err.into()),
            }
        }

        if self.ack_deadline.is_none() && self.mtp.has_pending_acks() {
            if let Some(params) = &self.params {
                self.ack_deadline = Some(Instant::now() + params.ack_delay);
            }
        }

        Ok(updates)
    }

    /// Handle `n` more written bytes being ready to process by the transport.
    fn on_net_write(&mut self, n: usize) -> Result<(), ReadError> {
        if n == 0 {
            return Err(ReadError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "wrote 0 bytes",
            )));
        }

        self.write_head += n;
        trace!(
            "written {} bytes to the network ({}/{})",
            n,
            self.write_head,
            self.write_buffer.len()
        );
        if self.write_head < self.write_buffer.len() {
            return Ok(());
        }

        self.write_buffer.clear();
        self.write_head = 0;
        for req in self.requests.iter_mut() {
            if let RequestState::Serialized(pair) = &req.state {
                debug!("sent request with {:?}", pair);
                req.state = RequestState::Sent(pair.clone());
            }
        }
        Ok(())
    }

    /// Handle a ping timeout, meaning we need to enqueue a new ping request.
    ///
    /// If the previous ping was never answered, the stream is considered dead.
    fn on_ping_timeout(&mut self) -> Result<(), ReadError> {
        if let Some(mut previous) = self.ping.take() {
            if let Err(TryRecvError::Empty) = previous.try_recv() {
                warn!("previous keepalive ping went unanswered");
                return Err(ReadError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "keepalive ping went unanswered",
                )));
            }
        }

        let Some(params) = &self.params else {
            self.next_ping = None;
            return Ok(());
        };
        self.next_ping = Some(Instant::now() + params.ping_interval);

        let ping_id = generate_random_id();
        debug!("enqueueing keepalive ping {}", ping_id);
        let (tx, rx) = oneshot::channel();
        self.enqueue(
            tl::functions::PingDelayDisconnect {
                ping_id,
                disconnect_delay: NO_PING_DISCONNECT,
            }
            .to_bytes(),
            RequestKind::Ping,
            tx,
        );
        self.ping = Some(rx);
        Ok(())
    }

    /// Process the result of deserializing an MTP buffer.
    fn process_mtp_buffer(&mut self, results: Vec<Deserialization>, updates: &mut Vec<Vec<u8>>) {
        for result in results {
            match result {
                Deserialization::Update(update) => updates.push(update),
                Deserialization::RpcResult(result) => self.process_result(result),
                Deserialization::RpcError(error) => self.process_error(error),
                Deserialization::BadMessage(bad_msg) => self.process_bad_message(bad_msg),
                Deserialization::Failure(failure) => self.process_deserialize_error(failure),
                Deserialization::NewSession { first_msg_id } => {
                    self.process_new_session(first_msg_id)
                }
                Deserialization::Acknowledged(msg_id) => self.process_ack(msg_id),
                Deserialization::DetailedInfo {
                    msg_id,
                    answer_msg_id,
                } => self.process_detailed_info(msg_id, answer_msg_id),
            }
        }
    }

    /// The server answered the request that carried `initConnection`.
    fn mark_initialized(&mut self, request: &Request) {
        if request.kind == RequestKind::InitConnection && self.init != InitState::Done {
            debug!("connection initialized");
            self.init = InitState::Done;
        }
    }

    /// The request that carried `initConnection` will never be answered,
    /// so the next call has to carry it instead.
    fn unmark_initialized(&mut self, request: &mut Request) {
        if request.kind == RequestKind::InitConnection {
            request.kind = RequestKind::Call;
            if self.init == InitState::Waiting {
                self.init = InitState::Needed;
            }
        }
    }

    fn process_result(&mut self, result: RpcResult) {
        if let Some(req) = self.pop_request(result.msg_id) {
            self.mark_initialized(&req);
            let x = result.body;
            if x.len() >= 4 {
                debug!(
                    "got result {:08x} for request {:?}",
                    u32::from_le_bytes([x[0], x[1], x[2], x[3]]),
                    result.msg_id
                );
            }
            drop(req.result.send(Ok(x)));
        } else {
            info!(
                "got rpc result {:?} but no such request is saved",
                result.msg_id
            );
        }
    }

    fn process_error(&mut self, error: RpcResultError) {
        if let Some(req) = self.pop_request(error.msg_id) {
            self.mark_initialized(&req);
            debug!("got rpc error {:?}", error.error);
            let caused_by = req.constructor_id();
            drop(req.result.send(Err(InvocationError::Rpc(
                RpcError::from(error.error).with_caused_by(caused_by),
            ))));
        } else {
            info!(
                "got rpc error {:?} but no such request is saved",
                error.msg_id
            );
        }
    }

    fn process_bad_message(&mut self, bad_msg: BadMessage) {
        for i in (0..self.requests.len()).rev() {
            let Some(pair) = self.requests[i].pair().cloned() else {
                continue;
            };
            if !pair.matches(bad_msg.msg_id) {
                continue;
            }

            let mut req = self.requests.swap_remove(i);
            self.unmark_initialized(&mut req);
            if bad_msg.retryable() {
                info!(
                    "{}; re-sending request {:?}",
                    bad_msg.description(),
                    pair.msg_id
                );
                req.state = RequestState::NotSerialized;
                self.requests.push(req);
            } else {
                warn!(
                    "{}; cannot retry request {:?}",
                    bad_msg.description(),
                    pair.msg_id
                );
                drop(req.result.send(Err(InvocationError::BadMessage {
                    code: bad_msg.code,
                })));
            }
        }
    }

    fn process_deserialize_error(&mut self, failure: DeserializationFailure) {
        if let Some(req) = self.pop_request(failure.msg_id) {
            self.mark_initialized(&req);
            debug!("got deserialization failure {:?}", failure.error);
            drop(req.result.send(Err(InvocationError::from(failure.error))));
        } else {
            info!(
                "got deserialization failure {:?} but no such request is saved",
                failure.error
            );
        }
    }

    /// Requests sent before the new session began were lost.
    fn process_new_session(&mut self, first_msg_id: MsgId) {
        let mut resent = 0;
        for req in self.requests.iter_mut() {
            if matches!(&req.state, RequestState::Sent(pair) if pair.msg_id < first_msg_id) {
                req.state = RequestState::NotSerialized;
                if req.kind == RequestKind::InitConnection {
                    req.kind = RequestKind::Call;
                    if self.init == InitState::Waiting {
                        self.init = InitState::Needed;
                    }
                }
                resent += 1;
            }
        }
        if resent > 0 {
            info!("new session created; re-sending {} request(s)", resent);
        }
    }

    /// Some calls are only ever acknowledged, never answered.
    fn process_ack(&mut self, msg_id: MsgId) {
        let Some(i) = self
            .requests
            .iter()
            .position(|r| matches!(&r.state, RequestState::Sent(pair) if pair.msg_id == msg_id))
        else {
            return;
        };

        let req = &self.requests[i];
        if req.kind == RequestKind::InitConnection && self.init == InitState::Waiting {
            debug!("connection initialized (acknowledged)");
            self.init = InitState::Done;
        }
        if req.constructor_id() == tl::functions::AUTH_LOG_OUT_ID {
            debug!("log out acknowledged");
            let req = self.requests.swap_remove(i);
            drop(req.result.send(Ok(true.to_bytes())));
        }
    }

    fn process_detailed_info(&mut self, msg_id: MsgId, answer_msg_id: MsgId) {
        let waiting = self
            .requests
            .iter()
            .any(|r| matches!(&r.state, RequestState::Sent(pair) if pair.msg_id == msg_id));
        if waiting {
            debug!("asking for answer {:?} to {:?}", answer_msg_id, msg_id);
            self.mtp.request_resend(answer_msg_id);
        } else {
            self.mtp.ack(answer_msg_id);
        }
    }

    fn pop_request(&mut self, msg_id: MsgId) -> Option<Request> {
        let i = self
            .requests
            .iter()
            .position(|r| r.pair().is_some_and(|pair| pair.msg_id == msg_id))?;
        Some(self.requests.swap_remove(i))
    }

    /// Drops the requests nobody is waiting for anymore.
    pub(crate) fn drop_cancelled(&mut self) {
        let mut i = 0;
        while i < self.requests.len() {
            if self.requests[i].result.is_closed() && self.requests[i].kind != RequestKind::Ping {
                let mut req = self.requests.swap_remove(i);
                debug!("dropping cancelled request {:08x}", req.constructor_id());
                self.unmark_initialized(&mut req);
            } else {
                i += 1;
            }
        }
    }

    /// Takes the pending requests out, to be carried over to a new stream.
    pub(crate) fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
            .into_iter()
            .filter(|r| r.kind != RequestKind::Ping && !r.result.is_closed())
            .map(|mut r| {
                r.kind = RequestKind::Call;
                r.state = RequestState::NotSerialized;
                r
            })
            .collect()
    }

    /// Adds requests taken from another sender. They are all sent again.
    pub(crate) fn restore_requests(&mut self, requests: Vec<Request>) {
        if !requests.is_empty() {
            info!("re-sending {} request(s) on the new stream", requests.len());
        }
        self.requests.extend(requests);
    }

    /// Fails every pending request with `error`.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> InvocationError) {
        if !self.requests.is_empty() {
            warn!("marking all {} request(s) as failed", self.requests.len());
        }
        for request in self.requests.drain(..) {
            request.fail(error());
        }
    }

    /// Writes whatever acknowledgements and replies are still pending.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        if self.write_buffer.is_empty() {
            self.mtp_buffer.clear();
            if self.mtp.finalize(&mut self.mtp_buffer).is_some() {
                self.transport.pack(&self.mtp_buffer, &mut self.write_buffer);
            }
            self.mtp_buffer.clear();
        }
        if self.write_head < self.write_buffer.len() {
            self.writer
                .write_all(&self.write_buffer[self.write_head..])
                .await?;
            self.writer.flush().await?;
        }
        self.write_buffer.clear();
        self.write_head = 0;
        Ok(())
    }

    pub(crate) fn has_received(&self) -> bool {
        self.received
    }

    /// Turns the sender into its MTP state, dropping the stream.
    pub fn into_mtp(self) -> M {
        self.mtp
    }
}

impl<T: Transport, S> Sender<T, mtp::Encrypted, S> {
    pub fn auth_key(&self) -> Option<[u8; 256]> {
        self.mtp.auth_key()
    }
}

/// Helper function to create a plain [`Sender`] and [`generate_auth_key`] on it.
pub async fn connect<T, S>(
    stream: S,
    transport: T,
    dc_id: Option<i32>,
    params: ConnectionParams,
) -> Result<Sender<T, mtp::Encrypted, S>, InvocationError>
where
    T: Transport,
    S: AsyncRead + AsyncWrite,
{
    let sender = Sender::new(stream, transport, mtp::Plain::new(), None);
    generate_auth_key(sender, dc_id, params).await
}

/// Uses the input plain sender to carry the Authorization Key generation process,
/// and returns an encrypted sender reusing the same stream, transport and buffers.
pub async fn generate_auth_key<T, S>(
    mut sender: Sender<T, mtp::Plain, S>,
    dc_id: Option<i32>,
    params: ConnectionParams,
) -> Result<Sender<T, mtp::Encrypted, S>, InvocationError>
where
    T: Transport,
    S: AsyncRead + AsyncWrite,
{
    info!("generating new authorization key...");
    let (request, data) = authentication::step1()?;
    debug!("gen auth key: sending step 1");
    let response = sender.send(request).await?;
    debug!("gen auth key: starting step 2");
    let (request, data) = authentication::step2(data, &response, dc_id)?;
    debug!("gen auth key: sending step 2");
    let response = sender.send(request).await?;
    debug!("gen auth key: starting step 3");
    let (mut request, mut data) = authentication::step3(data, &response)?;
    let authentication::Finished {
        auth_key,
        time_offset,
        first_salt,
    } = loop {
        debug!("gen auth key: sending step 3");
        let response = sender.send(request).await?;
        debug!("gen auth key: completing generation");
        match authentication::create_key(data, &response)? {
            authentication::Outcome::Finished(finished) => break finished,
            authentication::Outcome::Retry {
                request: retry,
                data: retry_data,
            } => {
                info!("server asked to retry the last step of the key exchange");
                request = retry;
                data = retry_data;
            }
        }
    };
    info!("authorization key generated successfully");

    let mtp = mtp::Encrypted::build()
        .time_offset(time_offset)
        .first_salt(first_salt)
        .finish(AuthKey::from_bytes(auth_key));

    Ok(sender.with_mtp(mtp, params))
}

/// Helper function to create an encrypted [`Sender`] with a previous Authorization Key.
pub fn connect_with_auth<T, S>(
    stream: S,
    transport: T,
    auth_key: [u8; 256],
    params: ConnectionParams,
) -> Sender<T, mtp::Encrypted, S>
where
    T: Transport,
    S: AsyncRead + AsyncWrite,
{
    Sender::new(
        stream,
        transport,
        mtp::Encrypted::build().finish(AuthKey::from_bytes(auth_key)),
        Some(params),
    )
}

impl<T: Transport, S> Sender<T, mtp::Plain, S> {
    /// Swaps the plain state for an encrypted one, keeping the stream.
    fn with_mtp(self, mtp: mtp::Encrypted, params: ConnectionParams) -> Sender<T, mtp::Encrypted, S> {
        let now = Instant::now();
        Sender {
            reader: self.reader,
            writer: self.writer,
            transport: self.transport,
            mtp,
            next_ping: Some(now + params.ping_interval),
            init: InitState::Needed,
            params: Some(params),
            requests: self.requests,
            ping: None,
            ack_deadline: None,
            received: false,
            read_buffer: self.read_buffer,
            unpacked: self.unpacked,
            mtp_buffer: self.mtp_buffer,
            write_buffer: self.write_buffer,
            write_head: self.write_head,
        }
    }
}

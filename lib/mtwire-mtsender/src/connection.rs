// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A connection to one datacenter, driven by a single task.
//!
//! The [`ConnectionRunner`] owns the stream and every piece of protocol
//! state. Everything else talks to it through cheap [`ConnectionHandle`]s,
//! and learns about its progress through the channels in [`Connection`].
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use mtwire_mtproto::mtp;
use mtwire_mtproto::tl::{Deserializable, RemoteCall};
use mtwire_mtproto::transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::configuration::ConnectionParams;
use crate::errors::{ConnectionError, InvocationError, ReadError};
use crate::net::Connector;
use crate::sender::{self, MAXIMUM_DATA, Request as PendingRequest, ResultSender, Sender};
use crate::storage::Storage;

/// First wait after the server complains about too many connections.
const FLOOD_DELAY_START: Duration = Duration::from_millis(1000);

/// The wait doubles with every complaint, up to this.
const FLOOD_DELAY_MAX: Duration = Duration::from_millis(16000);

/// How long pending acknowledgements may take to be written on shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type InvokeResponse = Vec<u8>;

enum Request {
    Invoke { body: Vec<u8>, tx: ResultSender },
    /// A caller stopped waiting for its result.
    Cancel,
    Quit,
}

enum Event {
    Step(Result<Vec<Vec<u8>>, ReadError>),
    Request(Option<Request>),
}

type EncryptedSender<C, T> = Sender<T, mtp::Encrypted, <C as Connector>::Stream>;

#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Request>,
    request_timeout: Option<Duration>,
}

pub struct Connection<C: Connector, T: Transport> {
    /// The single mutable instance responsible for driving I/O.
    ///
    /// Nothing happens until [`ConnectionRunner::run`] is polled, normally
    /// by spawning it as its own task.
    pub runner: ConnectionRunner<C, T>,
    /// Starting handle attached to the [`Connection::runner`].
    pub handle: ConnectionHandle,
    /// Messages the server sent on its own, in the order they arrived.
    pub updates: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Every time the authorization key changes: `None` when the server
    /// forgot the old one, followed by the new one once generated.
    pub key_changes: mpsc::UnboundedReceiver<Option<[u8; 256]>>,
    /// Problems the runner recovered from (or tried to).
    pub errors: mpsc::UnboundedReceiver<ConnectionError>,
}

pub struct ConnectionRunner<C: Connector, T: Transport> {
    connector: C,
    transport: fn() -> T,
    storage: Arc<dyn Storage>,
    dc_id: i32,
    params: ConnectionParams,
    request_rx: mpsc::UnboundedReceiver<Request>,
    updates_tx: mpsc::UnboundedSender<Vec<u8>>,
    key_tx: mpsc::UnboundedSender<Option<[u8; 256]>>,
    errors_tx: mpsc::UnboundedSender<ConnectionError>,
}

impl ConnectionHandle {
    /// Communicate with the running [`ConnectionRunner`] instance to invoke
    /// the serialized request body, and wait for its serialized result.
    ///
    /// Without a `timeout`, the [`ConnectionParams::request_timeout`] applies.
    /// A request that times out is dropped from the queue; if it was already
    /// sent, its result is discarded when it arrives.
    ///
    /// Panics if the body is not padded to 4 bytes.
    pub async fn invoke(
        &self,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<InvokeResponse, InvocationError> {
        if body.len() > MAXIMUM_DATA {
            return Err(InvocationError::PayloadTooLarge { size: body.len() });
        }
        assert!(body.len() >= 4 && body.len() % 4 == 0);

        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Request::Invoke { body, tx })
            .map_err(|_| InvocationError::Dropped)?;

        match timeout.or(self.request_timeout) {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(result) => result.map_err(|_| InvocationError::Dropped)?,
                Err(_) => {
                    debug!("request timed out after {:?}", duration);
                    let _ = self.tx.send(Request::Cancel);
                    Err(InvocationError::Timeout)
                }
            },
            None => rx.await.map_err(|_| InvocationError::Dropped)?,
        }
    }

    /// [`Self::invoke`] for a typed request.
    pub async fn call<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.invoke(request.to_bytes(), None).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Communicate with the running [`ConnectionRunner`] instance
    /// to flush what it can and gracefully stop running.
    ///
    /// Pending requests fail with [`InvocationError::Dropped`].
    pub fn quit(&self) -> bool {
        self.tx.send(Request::Quit).is_ok()
    }
}

impl<C: Connector, T: Transport> Connection<C, T> {
    /// Creates a connection to `dc_id` with default configuration.
    ///
    /// `transport` builds a fresh transport for every stream that is opened.
    /// The key for the datacenter is read from and written to `storage`.
    pub fn new(connector: C, transport: fn() -> T, storage: Arc<dyn Storage>, dc_id: i32) -> Self {
        Self::with_configuration(connector, transport, storage, dc_id, Default::default())
    }

    /// Creates a connection with non-[`ConnectionParams::default`] configuration.
    pub fn with_configuration(
        connector: C,
        transport: fn() -> T,
        storage: Arc<dyn Storage>,
        dc_id: i32,
        params: ConnectionParams,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (key_tx, key_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        Self {
            handle: ConnectionHandle {
                tx: request_tx,
                request_timeout: params.request_timeout,
            },
            runner: ConnectionRunner {
                connector,
                transport,
                storage,
                dc_id,
                params,
                request_rx,
                updates_tx,
                key_tx,
                errors_tx,
            },
            updates: updates_rx,
            key_changes: key_rx,
            errors: errors_rx,
        }
    }
}

impl<C: Connector, T: Transport> ConnectionRunner<C, T> {
    /// Run the connection until [`ConnectionHandle::quit`] is called, every
    /// handle is dropped, or reconnecting is given up on.
    pub async fn run(mut self) {
        let mut sender = match self.establish(None, Vec::new(), None).await {
            Ok(sender) => sender,
            Err((requests, error)) => return self.give_up(requests, error),
        };
        let mut flood_delay = None;

        loop {
            let event = tokio::select! {
                step = sender.step() => Event::Step(step),
                request = self.request_rx.recv() => Event::Request(request),
            };

            match event {
                Event::Step(Ok(updates)) => {
                    for update in updates {
                        let _ = self.updates_tx.send(update);
                    }
                    if sender.has_received() {
                        flood_delay = None;
                    }
                }
                Event::Step(Err(err)) => {
                    warn!("connection to dc {} lost: {}", self.dc_id, err);
                    let status = err.status();
                    let error = InvocationError::from(err.clone());
                    let _ = self.errors_tx.send(ConnectionError::Read(err));

                    let requests = sender.take_requests();
                    let mtp = sender.into_mtp();
                    let established = match status {
                        // The key is replaced right away; the policy only
                        // applies if that fails.
                        Some(404) => {
                            self.forget_key();
                            self.establish(None, requests, None).await
                        }
                        Some(429) => {
                            let delay = flood_delay
                                .map_or(FLOOD_DELAY_START, |d: Duration| (d * 2).min(FLOOD_DELAY_MAX));
                            flood_delay = Some(delay);
                            info!("too many connections; waiting {:?} before reconnecting", delay);
                            sleep(delay).await;
                            self.establish(Some(mtp), requests, Some(error)).await
                        }
                        _ => self.establish(Some(mtp), requests, Some(error)).await,
                    };

                    match established {
                        Ok(new_sender) => sender = new_sender,
                        Err((requests, error)) => return self.give_up(requests, error),
                    }
                }
                Event::Request(Some(Request::Invoke { body, tx })) => sender.enqueue_body(body, tx),
                Event::Request(Some(Request::Cancel)) => sender.drop_cancelled(),
                Event::Request(Some(Request::Quit)) | Event::Request(None) => break,
            }
        }

        info!("closing connection to dc {}", self.dc_id);
        match tokio::time::timeout(FLUSH_TIMEOUT, sender.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("failed to flush before closing: {}", e),
            Err(_) => debug!("timed out flushing before closing"),
        }
        sender.fail_all(|| InvocationError::Dropped);
        self.drain(|| InvocationError::Dropped);
    }

    /// Opens a new stream, consulting the reconnection policy between attempts.
    ///
    /// With `mtp`, the existing session continues on the new stream. Otherwise
    /// the stored key is used, or a new one is generated.
    ///
    /// If `error` is present the connection was just lost because of it, and
    /// the policy decides whether even the first attempt is made.
    async fn establish(
        &mut self,
        mut mtp: Option<mtp::Encrypted>,
        requests: Vec<PendingRequest>,
        mut error: Option<InvocationError>,
    ) -> Result<EncryptedSender<C, T>, (Vec<PendingRequest>, InvocationError)> {
        let mut attempts = 0;
        loop {
            if let Some(last_error) = error.take() {
                match self.params.reconnection_policy.should_retry(attempts) {
                    ControlFlow::Continue(delay) => {
                        info!(
                            "reconnecting to dc {} in {:?} (attempt {})",
                            self.dc_id,
                            delay,
                            attempts + 1
                        );
                        sleep(delay).await;
                    }
                    ControlFlow::Break(()) => return Err((requests, last_error)),
                }
            }

            match self.try_establish(&mut mtp).await {
                Ok(mut sender) => {
                    info!("connected to dc {}", self.dc_id);
                    sender.restore_requests(requests);
                    return Ok(sender);
                }
                Err(e) => {
                    attempts += 1;
                    error = Some(e);
                }
            }
        }
    }

    async fn try_establish(
        &mut self,
        mtp: &mut Option<mtp::Encrypted>,
    ) -> Result<EncryptedSender<C, T>, InvocationError> {
        let stream = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("failed to connect to dc {}: {}", self.dc_id, e);
                let error = io::Error::new(e.kind(), e.to_string());
                let _ = self.errors_tx.send(ConnectionError::Connect(e));
                return Err(InvocationError::Io(error));
            }
        };

        if let Some(mtp) = mtp.take() {
            return Ok(Sender::new(
                stream,
                (self.transport)(),
                mtp,
                Some(self.params.clone()),
            ));
        }

        if let Some(auth_key) = self.storage.auth_key(self.dc_id) {
            debug!("using stored authorization key for dc {}", self.dc_id);
            return Ok(sender::connect_with_auth(
                stream,
                (self.transport)(),
                auth_key,
                self.params.clone(),
            ));
        }

        let dc = self.params.handshake_dc(self.dc_id);
        match sender::connect(stream, (self.transport)(), Some(dc), self.params.clone()).await {
            Ok(sender) => {
                if let Some(auth_key) = sender.auth_key() {
                    self.storage.set_auth_key(self.dc_id, Some(auth_key));
                    let _ = self.key_tx.send(Some(auth_key));
                }
                Ok(sender)
            }
            Err(e) => {
                warn!("failed to generate authorization key for dc {}: {}", self.dc_id, e);
                let _ = self
                    .errors_tx
                    .send(ConnectionError::Authentication(e.clone()));
                Err(e)
            }
        }
    }

    /// The server no longer knows the key, so it must not be used again.
    fn forget_key(&mut self) {
        warn!("dc {} forgot our authorization key", self.dc_id);
        self.storage.set_auth_key(self.dc_id, None);
        let _ = self.key_tx.send(None);
    }

    fn give_up(mut self, requests: Vec<PendingRequest>, error: InvocationError) {
        error!("giving up on dc {}: {}", self.dc_id, error);
        for request in requests {
            request.fail(error.clone());
        }
        self.drain(|| error.clone());
    }

    /// Fails whatever is still queued in the channel.
    fn drain(&mut self, error: impl Fn() -> InvocationError) {
        self.request_rx.close();
        while let Ok(request) = self.request_rx.try_recv() {
            if let Request::Invoke { tx, .. } = request {
                let _ = tx.send(Err(error()));
            }
        }
    }
}

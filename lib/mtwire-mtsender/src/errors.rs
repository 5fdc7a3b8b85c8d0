// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtwire_mtproto::{authentication, mtp, tl, transport};
use std::{fmt, io};

/// The connection could not read a valid payload and must be re-established.
#[derive(Debug)]
pub enum ReadError {
    /// Standard I/O error.
    Io(io::Error),
    /// Error propagated from the underlying [`transport`].
    Transport(transport::Error),
    /// The payload was well-framed but could not be understood.
    Deserialize(mtp::DeserializeError),
}

impl std::error::Error for ReadError {}

fn clone_io(e: &io::Error) -> io::Error {
    e.raw_os_error()
        .map(io::Error::from_raw_os_error)
        .unwrap_or_else(|| io::Error::new(e.kind(), e.to_string()))
}

impl Clone for ReadError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(clone_io(e)),
            Self::Transport(e) => Self::Transport(e.clone()),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read error, IO failed: {err}"),
            Self::Transport(err) => write!(f, "read error, transport-level: {err}"),
            Self::Deserialize(err) => write!(f, "read error, bad response: {err}"),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<transport::Error> for ReadError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<mtp::DeserializeError> for ReadError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl ReadError {
    /// The transport-level status code the server closed the stream with, if any.
    pub fn status(&self) -> Option<u32> {
        match self {
            Self::Transport(transport::Error::BadStatus { status }) => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to [HTTP response status codes](https://developer.mozilla.org/en-US/docs/Web/HTTP/Reference/Status).
    pub code: i32,

    /// The ASCII error name, normally in screaming snake case.
    ///
    /// Digit words are removed from the name and put in the [`RpcError::value`] instead.
    pub name: String,

    /// If the error contained an additional integer value, it will be present here and removed from the [`RpcError::name`].
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this error.
    /// Won't be present if the error was artificially constructed.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by {caused_by:08x}")?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl From<tl::types::RpcError> for RpcError {
    fn from(error: tl::types::RpcError) -> Self {
        // Extract the numeric value in the error, if any
        if let Some((value, parsed_value)) = error
            .error_message
            .split(|c: char| !c.is_ascii_digit())
            .flat_map(|value| {
                value
                    .parse::<u32>()
                    .map(|parsed_value| (value, parsed_value))
            })
            .next()
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error.error_code,
                name: error.error_message.replace(&to_remove, ""),
                value: Some(parsed_value),
                caused_by: None,
            }
        } else {
            Self {
                code: error.error_code,
                name: error.error_message.clone(),
                value: None,
                caused_by: None,
            }
        }
    }
}

impl RpcError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// Useful in `match` arm guards. A single trailing or leading asterisk (`'*'`) is allowed,
    /// and will instead check if the error name starts (or ends with) the input parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// # let request_result = Result::<(), _>::Err(mtwire_mtsender::RpcError {
    /// #     code: 420, name: "FLOOD_WAIT".to_string(), value: Some(31), caused_by: None });
    /// #
    /// match request_result {
    ///     Err(rpc_err) if rpc_err.is("AUTH_KEY_UNREGISTERED") => panic!(),
    ///     Err(rpc_err) if rpc_err.is("FLOOD_*") => {},
    ///     _ => panic!()
    /// }
    /// ```
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    /// Attaches the constructor identifier of the request that caused
    /// this error to the error information.
    pub fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

#[derive(Debug)]
pub enum InvocationError {
    /// The request invocation failed because it was invalid or the server
    /// could not process it successfully. If the server is suffering from
    /// temporary issues, the request may be retried after some time.
    Rpc(RpcError),

    /// Standard I/O error while the request was in flight, and the
    /// connection could not be re-established.
    Io(io::Error),

    /// The result arrived but could not be deserialized.
    Deserialize(mtp::DeserializeError),

    /// Error propagated from the underlying [`transport`].
    Transport(transport::Error),

    /// The server refused the message carrying the request for a reason
    /// that sending it again would not fix.
    BadMessage { code: i32 },

    /// The request is larger than what a single message can carry.
    /// It was never sent.
    PayloadTooLarge { size: usize },

    /// The caller-provided deadline passed before a result arrived.
    Timeout,

    /// The request was cancelled or dropped, and the results won't arrive.
    /// This happens when the connection is destroyed.
    Dropped,

    /// A new Authorization Key had to be generated, but the process failed.
    Authentication(authentication::Error),
}

impl std::error::Error for InvocationError {}

impl Clone for InvocationError {
    fn clone(&self) -> Self {
        match self {
            Self::Rpc(e) => Self::Rpc(e.clone()),
            Self::Io(e) => Self::Io(clone_io(e)),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
            Self::Transport(e) => Self::Transport(e.clone()),
            Self::BadMessage { code } => Self::BadMessage { code: *code },
            Self::PayloadTooLarge { size } => Self::PayloadTooLarge { size: *size },
            Self::Timeout => Self::Timeout,
            Self::Dropped => Self::Dropped,
            Self::Authentication(e) => Self::Authentication(e.clone()),
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {err}"),
            Self::Io(err) => write!(f, "request error: {err}"),
            Self::Deserialize(err) => write!(f, "request error: {err}"),
            Self::Transport(err) => write!(f, "request error: {err}"),
            Self::BadMessage { code } => {
                let description = mtp::BadMessage {
                    msg_id: mtwire_mtproto::MsgId(0),
                    code: *code,
                }
                .description();
                write!(f, "request error: bad request ({code}: {description})")
            }
            Self::PayloadTooLarge { size } => {
                write!(f, "request error: payload of {size} bytes is too large")
            }
            Self::Timeout => write!(f, "request error: timed out"),
            Self::Dropped => write!(f, "request error: dropped (connection destroyed)"),
            Self::Authentication(err) => write!(f, "request error: {err}"),
        }
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::Io(error) => Self::from(error),
            ReadError::Transport(error) => Self::from(error),
            ReadError::Deserialize(error) => Self::from(error),
        }
    }
}

impl From<mtp::DeserializeError> for InvocationError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<transport::Error> for InvocationError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<tl::Error> for InvocationError {
    fn from(error: tl::Error) -> Self {
        Self::Deserialize(error.into())
    }
}

impl From<io::Error> for InvocationError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<authentication::Error> for InvocationError {
    fn from(error: authentication::Error) -> Self {
        Self::Authentication(error)
    }
}

impl InvocationError {
    /// Matches on the name of the RPC error (case-sensitive).
    ///
    /// If the error is not a RPC error, returns `false`.
    /// See [`RpcError::is`] for the accepted patterns.
    #[inline]
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }
}

/// Problems the connection ran into on its own, reported on the error channel.
///
/// None of these fail the pending calls by themselves: the connection keeps
/// going for as long as its [`crate::ReconnectionPolicy`] allows.
#[derive(Debug)]
pub enum ConnectionError {
    /// Reading from the stream failed, so it was closed.
    Read(ReadError),

    /// A fresh stream could not be opened.
    Connect(io::Error),

    /// Generating a new Authorization Key failed.
    Authentication(InvocationError),
}

impl std::error::Error for ConnectionError {}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "connection error: {err}"),
            Self::Connect(err) => write!(f, "connection error, could not connect: {err}"),
            Self::Authentication(err) => write!(f, "connection error, authorization failed: {err}"),
        }
    }
}

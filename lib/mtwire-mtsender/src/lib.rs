// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library drives the Mobile Transport Protocol over a byte stream.
//!
//! The [`Sender`] is the base building block that manages a single stream,
//! the transport state, and the MTP state, as well as taking care of
//! buffering messages before sending them off in a single container.
//!
//! A [`Connection`] puts a `Sender` inside its own task, and keeps it alive:
//! keys are loaded from a [`Storage`] or generated, dropped streams are
//! reopened through a [`Connector`] according to a [`ReconnectionPolicy`],
//! and calls in flight are sent again. This will commonly be the entry
//! point to using this library.
//!
//! Many tasks can share access to the same `Connection` via multiple
//! [`ConnectionHandle`]s.

#![deny(unsafe_code)]

mod configuration;
mod connection;
mod errors;
mod net;
mod reconnection;
mod sender;
mod storage;

pub use configuration::ConnectionParams;
pub use connection::{Connection, ConnectionHandle, ConnectionRunner};
pub use errors::{ConnectionError, InvocationError, ReadError, RpcError};
pub use net::{Connector, TcpConnector};
pub use reconnection::{FixedReconnect, NoReconnect, ReconnectionPolicy};
pub use sender::{MAXIMUM_DATA, Sender, connect, connect_with_auth, generate_auth_key};
pub use storage::{MemoryStorage, Storage};

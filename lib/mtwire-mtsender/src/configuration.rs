// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::reconnection::{FixedReconnect, ReconnectionPolicy};
use mtwire_mtproto::tl::{self, functions};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LOCALE: &str = "en";

/// Everything a [`crate::Connection`] needs to know besides where to connect.
#[derive(Clone)]
pub struct ConnectionParams {
    /// The developer's application identifier, announced through `initConnection`.
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_code: String,
    pub lang_pack: String,
    /// The API layer to announce. Responses are shaped after it.
    pub layer: i32,
    /// Deadline applied to calls invoked without one. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// How often a keep-alive ping is sent.
    pub ping_interval: Duration,
    /// How long acknowledgements may wait for other messages to travel with.
    pub ack_delay: Duration,
    /// Whether the datacenter belongs to the test environment.
    pub is_test: bool,
    /// Whether the datacenter only serves media.
    pub is_media: bool,
    pub reconnection_policy: Arc<dyn ReconnectionPolicy>,
    #[doc(hidden)]
    pub __non_exhaustive: (),
}

impl ConnectionParams {
    /// The datacenter number the key exchange binds the key to: offset by
    /// 10000 in the test environment, and negative for media datacenters.
    pub fn handshake_dc(&self, dc_id: i32) -> i32 {
        let dc_id = if self.is_test { dc_id + 10000 } else { dc_id };
        if self.is_media { -dc_id } else { dc_id }
    }

    /// Wraps an already serialized query in `invokeWithLayer(initConnection(...))`.
    pub fn init_connection(&self, query: &[u8]) -> Vec<u8> {
        use tl::Serializable as _;

        functions::InvokeWithLayer {
            layer: self.layer,
            query: functions::InitConnection {
                api_id: self.api_id,
                device_model: self.device_model.clone(),
                system_version: self.system_version.clone(),
                app_version: self.app_version.clone(),
                system_lang_code: self.system_lang_code.clone(),
                lang_pack: self.lang_pack.clone(),
                lang_code: self.lang_code.clone(),
                query: query.to_vec(),
            }
            .to_bytes(),
        }
        .to_bytes()
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        let info = os_info::get();

        let mut system_lang_code = String::new();
        let mut lang_code = String::new();

        #[cfg(not(target_os = "android"))]
        {
            system_lang_code.push_str(&locate_locale::system());
            lang_code.push_str(&locate_locale::user());
        }
        if system_lang_code.is_empty() {
            system_lang_code.push_str(DEFAULT_LOCALE);
        }
        if lang_code.is_empty() {
            lang_code.push_str(DEFAULT_LOCALE);
        }

        Self {
            api_id: 0,
            device_model: format!("{} {}", info.os_type(), info.bitness()),
            system_version: info.version().to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            system_lang_code,
            lang_code,
            lang_pack: String::new(),
            layer: tl::LAYER,
            request_timeout: None,
            ping_interval: Duration::from_secs(60),
            ack_delay: Duration::from_millis(500),
            is_test: false,
            is_media: false,
            reconnection_policy: Arc::new(FixedReconnect {
                attempts: 5,
                delay: Duration::from_secs(1),
            }),
            __non_exhaustive: (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtwire_mtproto::tl::Deserializable;

    #[test]
    fn defaults_are_filled() {
        let params = ConnectionParams::default();
        assert!(!params.device_model.is_empty());
        assert!(!params.system_lang_code.is_empty());
        assert!(!params.lang_code.is_empty());
        assert_eq!(params.layer, tl::LAYER);
        assert_eq!(params.ack_delay, Duration::from_millis(500));
    }

    #[test]
    fn handshake_dc_numbering() {
        let mut params = ConnectionParams::default();
        assert_eq!(params.handshake_dc(2), 2);
        params.is_test = true;
        assert_eq!(params.handshake_dc(2), 10002);
        params.is_media = true;
        assert_eq!(params.handshake_dc(2), -10002);
    }

    #[test]
    fn init_connection_wraps_query() {
        let params = ConnectionParams {
            api_id: 6,
            ..Default::default()
        };
        let query = [1, 2, 3, 4];
        let wrapped = params.init_connection(&query);

        let outer = functions::InvokeWithLayer::from_bytes(&wrapped).unwrap();
        assert_eq!(outer.layer, tl::LAYER);
        let inner = functions::InitConnection::from_bytes(&outer.query).unwrap();
        assert_eq!(inner.api_id, 6);
        assert_eq!(inner.query, query);
    }
}

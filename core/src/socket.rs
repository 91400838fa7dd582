// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Message wrappers and identifiers for socket-based messaging.
//!
//! Every message sent over a socket is wrapped in a small JSON object that carries a message id
//! (`mid`) and a timestamp (`ts`).  Responses echo the id of the request they answer and add a
//! `status`, plus a `reason` for failures.

use crate::clocks::{Clock, epoch_millis};
use async_trait::async_trait;
use log::{debug, error, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of milliseconds in a day.
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Base of the textual representation of origins.
const ORIGIN_RADIX: u64 = 19;

/// Errors raised while handling socket messages.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SocketError {
    /// Indicates that a response was created without the id of the request it answers.
    #[error("message responses require a message id")]
    MissingMessageId,

    /// Indicates that the socket could not deliver the message.
    #[error("Cannot send message: {0}")]
    SendFailed(String),
}

/// Result type for this module.
pub type SocketResult<T> = Result<T, SocketError>;

/// Any transport able to deliver serialized messages.
#[async_trait]
pub trait MessageSocket: Send + Sync {
    /// Sends the JSON `message` to the peer.
    async fn send(&self, message: String) -> Result<(), String>;
}

/// Envelope of a socket message.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MessageWrapper {
    /// Identifier of the message, or of the request being answered.
    mid: String,

    /// Creation time in milliseconds since the epoch.
    ts: i64,

    /// Outcome of the request being answered, only in responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,

    /// Explanation of a failed response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,

    /// Message contents.
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl MessageWrapper {
    /// Adds the `key`/`value` pair to the message contents.
    pub fn with_field<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Gets the message id.
    pub fn mid(&self) -> &str {
        &self.mid
    }

    /// Gets the creation time of the message.
    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Gets the status of a response.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Gets the failure reason of a response.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Gets a field of the message contents.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Formats `n` in base `radix` using lowercase digits.
fn to_radix(mut n: u64, radix: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut digits = vec![];
    while n > 0 {
        digits.push(DIGITS[(n % radix) as usize]);
        n /= radix;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Creates message ids and wrappers for a single participant of a socket conversation.
pub struct SocketMessageDelegate {
    /// Clock used to stamp messages.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Random identifier of this participant.
    origin: String,

    /// Number of message ids created so far.
    message_count: AtomicU64,
}

impl SocketMessageDelegate {
    /// Creates a new delegate with a random origin.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let seed = rand::rng().random_range(10_000..=99_999_999_999u64);
        let origin = to_radix(seed + 100_000_000_000, ORIGIN_RADIX);
        debug!("Created socket message delegate with origin {}", origin);
        Self { clock, origin, message_count: AtomicU64::new(0) }
    }

    /// Overrides the number of messages already created, which affects the next message id.
    pub fn with_message_count(self, count: u64) -> Self {
        self.message_count.store(count, Ordering::SeqCst);
        self
    }

    /// Returns the current time in milliseconds since the epoch.
    fn now_ms(&self) -> i64 {
        epoch_millis(self.clock.now_utc())
    }

    /// Creates a new unique message id.
    ///
    /// Ids have the form `<origin>-<millis of the day in hex>-<1000000 + count>`.
    pub fn create_message_id(&self) -> String {
        let count = self.message_count.fetch_add(1, Ordering::SeqCst);
        let day_ms = self.now_ms().rem_euclid(DAY_MILLIS);
        format!("{}-{:x}-{}", self.origin, day_ms, 1_000_000 + count)
    }

    /// Creates a request wrapper for message `mid`, or for a new message if not given.
    pub fn create_request_wrapper(&self, mid: Option<&str>) -> MessageWrapper {
        let mid = match mid {
            Some(mid) if !mid.is_empty() => mid.to_owned(),
            _ => self.create_message_id(),
        };
        let wrapper = MessageWrapper {
            mid,
            ts: self.now_ms(),
            status: None,
            reason: None,
            payload: Map::new(),
        };
        info!("wrapper: {:?}", wrapper);
        wrapper
    }

    /// Creates a successful response to the request `mid`.
    pub fn create_response_wrapper(&self, mid: &str) -> SocketResult<MessageWrapper> {
        if mid.is_empty() {
            error!("{}", SocketError::MissingMessageId);
            return Err(SocketError::MissingMessageId);
        }
        Ok(MessageWrapper {
            mid: mid.to_owned(),
            ts: self.now_ms(),
            status: Some("ok".to_owned()),
            reason: None,
            payload: Map::new(),
        })
    }

    /// Creates a failed response to the request `mid` with an optional `reason`.
    pub fn create_failed_wrapper(
        &self,
        mid: &str,
        reason: Option<&str>,
    ) -> SocketResult<MessageWrapper> {
        let mut wrapper = self.create_response_wrapper(mid)?;
        wrapper.status = Some("failed".to_owned());
        wrapper.reason = reason.map(str::to_owned);
        Ok(wrapper)
    }

    /// Sends `wrapper` through `socket` and returns the id of the sent message.
    pub async fn send_socket_message(
        &self,
        socket: &dyn MessageSocket,
        wrapper: &MessageWrapper,
    ) -> SocketResult<String> {
        let json = serde_json::to_string(wrapper)
            .map_err(|e| SocketError::SendFailed(format!("Cannot serialize message: {}", e)))?;
        socket.send(json).await.map_err(SocketError::SendFailed)?;
        debug!("Sent message {}", wrapper.mid);
        Ok(wrapper.mid.clone())
    }

    /// Returns the number of message ids created so far.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    /// Returns the origin of this participant.
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

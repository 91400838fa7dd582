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

//! The `ServiceResponse` envelope wrapped around every JSON response.

use axum::Json;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope of every JSON response.
///
/// A successful envelope looks like `{"status": "ok", "ts": ..., "version": "1.0", "<key>": ...}`,
/// optionally with an `hmac` of the payload.  A failed envelope replaces the payload with a
/// `reason` and a `failCode`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    /// Either `ok` or `failed`.
    status: String,

    /// Creation time of the envelope in milliseconds since the epoch.
    ts: i64,

    /// Version of the envelope format.
    version: String,

    /// Description of the failure, for failed envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,

    /// Machine-readable failure code, for failed envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fail_code: Option<String>,

    /// Keyed digest of the payload, if signing was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hmac: Option<String>,

    /// Payload entries, keyed by their name.
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl ServiceResponse {
    /// Status of successful envelopes.
    pub const OK: &'static str = "ok";

    /// Status of failed envelopes.
    pub const FAILED: &'static str = "failed";

    /// Version of the envelope format.
    pub const VERSION: &'static str = "1.0";

    /// Failure code used when the caller does not supply one.
    pub const UNKNOWN_FAIL_CODE: &'static str = "unknown";

    /// Creates an empty successful envelope stamped at `ts` milliseconds since the epoch.
    pub fn ok(ts: i64) -> Self {
        Self {
            status: Self::OK.to_owned(),
            ts,
            version: Self::VERSION.to_owned(),
            reason: None,
            fail_code: None,
            hmac: None,
            payload: Map::new(),
        }
    }

    /// Creates a failed envelope stamped at `ts` with a `reason` and an optional `code`, which
    /// defaults to `unknown`.
    pub fn failed<R: Into<String>>(ts: i64, reason: R, code: Option<&str>) -> Self {
        Self {
            status: Self::FAILED.to_owned(),
            reason: Some(reason.into()),
            fail_code: Some(code.unwrap_or(Self::UNKNOWN_FAIL_CODE).to_owned()),
            ..Self::ok(ts)
        }
    }

    /// Attaches `value` to the envelope under `key`.
    pub fn with_payload<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Attaches the digest of the payload.
    pub fn with_hmac<S: Into<String>>(mut self, hmac: S) -> Self {
        self.hmac = Some(hmac.into());
        self
    }

    /// Returns true if this is a successful envelope.
    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }

    /// Gets the status of the envelope.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Gets the creation time of the envelope in milliseconds since the epoch.
    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Gets the version of the envelope format.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Gets the failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Gets the failure code, if any.
    pub fn fail_code(&self) -> Option<&str> {
        self.fail_code.as_deref()
    }

    /// Gets the payload digest, if any.
    pub fn hmac(&self) -> Option<&str> {
        self.hmac.as_deref()
    }

    /// Gets the payload entry `key`, if any.
    pub fn payload(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

impl IntoResponse for ServiceResponse {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

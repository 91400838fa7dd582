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

//! Helpers shared by all web services to build envelopes and sign their payloads.

use crate::clocks::{Clock, epoch_millis};
use crate::env::get_optional_var;
use crate::rest::{RestError, RestResult, ServiceResponse};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use log::debug;
use serde::Serialize;
use sha2::{Sha256, Sha384, Sha512};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

/// Digest algorithms supported to sign envelope payloads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HmacAlgorithm {
    /// HMAC with SHA-256.
    Sha256,

    /// HMAC with SHA-384.
    Sha384,

    /// HMAC with SHA-512.
    Sha512,
}

impl FromStr for HmacAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HmacAlgorithm::Sha256),
            "sha384" => Ok(HmacAlgorithm::Sha384),
            "sha512" => Ok(HmacAlgorithm::Sha512),
            _ => Err(format!("Unknown HMAC algorithm '{}'", s)),
        }
    }
}

/// Text encodings supported for envelope digests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum HmacEncoding {
    /// Lowercase hexadecimal digits.
    #[default]
    Hex,

    /// Standard base64 with padding.
    Base64,
}

impl FromStr for HmacEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(HmacEncoding::Hex),
            "base64" => Ok(HmacEncoding::Base64),
            _ => Err(format!("Unknown HMAC encoding '{}'", s)),
        }
    }
}

/// Options to configure a `WebService`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WebServiceOptions {
    /// Algorithm to sign payloads with.  Payloads are never signed if `None`.
    pub algorithm: Option<HmacAlgorithm>,

    /// Encoding of the computed digests.
    pub encoding: HmacEncoding,
}

impl WebServiceOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_HMAC_ALGORITHM` and `<prefix>_HMAC_ENCODING`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let algorithm = match get_optional_var::<String>(prefix, "HMAC_ALGORITHM")? {
            Some(raw) => Some(raw.parse::<HmacAlgorithm>()?),
            None => None,
        };
        let encoding = match get_optional_var::<String>(prefix, "HMAC_ENCODING")? {
            Some(raw) => raw.parse::<HmacEncoding>()?,
            None => HmacEncoding::default(),
        };
        Ok(Self { algorithm, encoding })
    }
}

/// Computes the HMAC of `data` with `key` using the digest `D`.
macro_rules! hmac_bytes {
    ( $digest:ty, $key:expr, $data:expr ) => {{
        let mut mac = Hmac::<$digest>::new_from_slice($key)
            .map_err(|e| RestError::InternalError(format!("Invalid HMAC key: {}", e)))?;
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

/// Envelope builder shared by all web services.
#[derive(Clone)]
pub struct WebService {
    /// Clock used to stamp envelopes.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Configuration of the service.
    opts: WebServiceOptions,
}

impl WebService {
    /// Creates a new envelope builder.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, opts: WebServiceOptions) -> Self {
        Self { clock, opts }
    }

    /// Returns the current time in milliseconds since the epoch.
    fn now_ms(&self) -> i64 {
        epoch_millis(self.clock.now_utc())
    }

    /// Creates a successful envelope carrying `value` under `key`.
    ///
    /// If an algorithm is configured and a `session` key is given, the envelope carries the
    /// digest of the JSON serialization of `value`.
    pub fn create_success_response<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        session: Option<&str>,
    ) -> RestResult<ServiceResponse> {
        let payload = serde_json::to_value(value)
            .map_err(|e| RestError::InternalError(format!("Cannot serialize payload: {}", e)))?;
        let hmac = match (self.opts.algorithm, session) {
            (Some(_), Some(session)) => Some(self.calculate_digest(&payload, session)?),
            _ => None,
        };

        let mut response = ServiceResponse::ok(self.now_ms()).with_payload(key, payload);
        if let Some(hmac) = hmac {
            response = response.with_hmac(hmac);
        }

        debug!("{:?}", response);
        Ok(response)
    }

    /// Creates a failed envelope with a `reason` and an optional failure `code`.
    pub fn create_failed_response<R: Into<String>>(
        &self,
        reason: R,
        code: Option<&str>,
    ) -> ServiceResponse {
        let response = ServiceResponse::failed(self.now_ms(), reason, code);
        debug!("{:?}", response);
        response
    }

    /// Renders the outcome of a handler as an HTTP response.
    ///
    /// Errors become failed envelopes stamped with this service's clock and carry the status code
    /// of the error.
    pub fn respond(&self, result: RestResult<ServiceResponse>) -> Response {
        match result {
            Ok(response) => response.into_response(),
            Err(e) => {
                let response = self.create_failed_response(e.to_string(), Some(e.fail_code()));
                (e.status(), response).into_response()
            }
        }
    }

    /// Turns the outcome of fetching a single record into an envelope.
    pub fn create_model_payload<T, E>(
        &self,
        result: Result<T, E>,
        name: &str,
        session: Option<&str>,
    ) -> ServiceResponse
    where
        T: Serialize,
        E: Into<RestError>,
    {
        let outcome = match result {
            Ok(model) => self.create_success_response(name, &model, session),
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(response) => response,
            Err(e) => self.create_failed_response(e.to_string(), Some(e.fail_code())),
        }
    }

    /// Turns the outcome of fetching a list of records into an envelope.
    pub fn create_list_payload<T, E>(
        &self,
        result: Result<Vec<T>, E>,
        name: &str,
        session: Option<&str>,
    ) -> ServiceResponse
    where
        T: Serialize,
        E: Into<RestError>,
    {
        self.create_model_payload(result, name, session)
    }

    /// Computes the keyed digest of the JSON serialization of `value`.
    ///
    /// `value` goes through `serde_json::Value` first so that the signed text is exactly the one
    /// that appears in envelopes, where object keys are sorted.
    pub fn calculate_digest<T: Serialize>(&self, value: &T, key: &str) -> RestResult<String> {
        let algorithm = self.opts.algorithm.ok_or_else(|| {
            RestError::InternalError("No HMAC algorithm configured".to_owned())
        })?;
        let json = serde_json::to_value(value)
            .and_then(|value| serde_json::to_string(&value))
            .map_err(|e| RestError::InternalError(format!("Cannot serialize payload: {}", e)))?;

        let key = key.as_bytes();
        let data = json.as_bytes();
        let digest = match algorithm {
            HmacAlgorithm::Sha256 => hmac_bytes!(Sha256, key, data),
            HmacAlgorithm::Sha384 => hmac_bytes!(Sha384, key, data),
            HmacAlgorithm::Sha512 => hmac_bytes!(Sha512, key, data),
        };

        Ok(match self.opts.encoding {
            HmacEncoding::Hex => hex::encode(digest),
            HmacEncoding::Base64 => general_purpose::STANDARD.encode(digest),
        })
    }

    /// Determines the client address of a request that arrived from `peer` with `headers`.
    ///
    /// When `X-Forwarded-For` lists more than one address, the last one is used.  Otherwise, the
    /// address is the first listed one or, in its absence, the socket peer.
    pub fn find_ip_address(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
        let ips = forwarded_ips(headers);
        match ips.len() {
            0 => peer.map(|ip| ip.to_string()),
            1 => ips.into_iter().next(),
            _ => ips.into_iter().last(),
        }
    }
}

/// Returns the addresses listed in all `X-Forwarded-For` headers, in order.
pub(crate) fn forwarded_ips(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned)
        .collect()
}

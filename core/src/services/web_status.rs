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

//! Service that reports the health of the running process.

use crate::clocks::Clock;
use crate::model::coerce::format_timestamp;
use crate::rest::{EmptyBody, Service, ServiceRoute, WebService};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use futures::lock::Mutex;
use http::Method;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

/// Default name of the service.
const SERVICE_NAME: &str = "WebStatusService";

/// Payload key of the status report.
const PAYLOAD_KEY: &str = "webStatus";

/// Formats the time elapsed between `start` and `end` as `DD days+HH:MM:SS`.
///
/// Negative intervals are reported as zero.
pub fn format_elapsed_time(start: OffsetDateTime, end: OffsetDateTime) -> String {
    let elapsed = (end - start).whole_seconds().max(0);
    let days = elapsed / 86400;
    let hours = (elapsed % 86400) / 3600;
    let minutes = (elapsed % 3600) / 60;
    let seconds = elapsed % 60;
    format!("{:02} days+{:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

/// Details of the running process.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProcessInfo {
    /// Process identifier.
    pub pid: u32,

    /// Name of the running program.
    pub title: String,

    /// Version of the runtime serving the application.
    pub vers: String,
}

/// Status report returned by the service.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WebStatus {
    /// Version of the application.
    pub version: String,

    /// Name of the environment the application runs in.
    pub env: String,

    /// Start time of the application, in RFC 3339 format.
    pub epoch: String,

    /// Time elapsed since `epoch`.
    pub uptime: String,

    /// Number of warnings recorded since the start.
    pub warnings: usize,

    /// Number of errors recorded since the start.
    pub errors: usize,

    /// Details of the process.
    pub process: ProcessInfo,

    /// Total memory of the machine in bytes, if known.
    pub totalmem: Option<u64>,

    /// Available memory of the machine in bytes, if known.
    pub freemem: Option<u64>,

    /// Load averages over 1, 5 and 15 minutes, if known.
    pub loadavg: Option<Vec<f64>>,

    /// CPU architecture.
    pub arch: String,
}

/// Configuration of the status service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WebStatusOptions {
    /// Version of the application.
    pub version: String,

    /// Name of the environment the application runs in.
    pub environment: String,

    /// Start time of the application.  Defaults to the time the service is created.
    pub epoch: Option<OffsetDateTime>,
}

/// Counters of the events recorded by the handlers.
#[derive(Default)]
struct Events {
    /// Number of warnings seen so far.
    warnings: usize,

    /// Number of errors seen so far.
    errors: usize,
}

/// State of the status handler.
struct WebStatusState {
    /// Clock used to compute the uptime.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Envelope builder.
    web: WebService,

    /// Version of the application.
    version: String,

    /// Name of the environment the application runs in.
    environment: String,

    /// Start time of the application.
    epoch: OffsetDateTime,

    /// Recorded warnings and errors.
    events: Mutex<Events>,
}

/// Extracts the value in kB of the `field` line from the contents of `/proc/meminfo`, in bytes.
fn parse_meminfo(meminfo: &str, field: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Extracts the three load averages from the contents of `/proc/loadavg`.
fn parse_loadavg(loadavg: &str) -> Option<Vec<f64>> {
    let values = loadavg
        .split_whitespace()
        .take(3)
        .map(|v| v.parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    if values.len() == 3 { Some(values) } else { None }
}

/// Returns the name of the running program.
fn process_title() -> String {
    std::env::args()
        .next()
        .as_deref()
        .map(|arg0| arg0.rsplit('/').next().unwrap_or(arg0).to_owned())
        .unwrap_or_default()
}

impl WebStatusState {
    /// Builds the status report.
    async fn create_web_status(&self) -> WebStatus {
        let now = self.clock.now_utc();
        let (warnings, errors) = {
            let events = self.events.lock().await;
            (events.warnings, events.errors)
        };

        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok();
        let loadavg = tokio::fs::read_to_string("/proc/loadavg").await.ok();

        WebStatus {
            version: self.version.clone(),
            env: self.environment.clone(),
            epoch: format_timestamp(&self.epoch).unwrap_or_default(),
            uptime: format_elapsed_time(self.epoch, now),
            warnings,
            errors,
            process: ProcessInfo {
                pid: std::process::id(),
                title: process_title(),
                vers: format!("iii-iv-svc-core {}", env!("CARGO_PKG_VERSION")),
            },
            totalmem: meminfo.as_deref().and_then(|m| parse_meminfo(m, "MemTotal")),
            freemem: meminfo.as_deref().and_then(|m| parse_meminfo(m, "MemAvailable")),
            loadavg: loadavg.as_deref().and_then(parse_loadavg),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }
}

/// Service that reports the status of the application on `GET /status`.
pub struct WebStatusService {
    /// Name of the service.
    name: String,

    /// Handler state.
    state: Arc<WebStatusState>,
}

impl WebStatusService {
    /// Creates the service with its default name.
    pub fn new(
        clock: Arc<dyn Clock + Send + Sync>,
        web: WebService,
        opts: WebStatusOptions,
    ) -> Self {
        let epoch = opts.epoch.unwrap_or_else(|| clock.now_utc());
        let state = WebStatusState {
            clock,
            web,
            version: opts.version,
            environment: opts.environment,
            epoch,
            events: Mutex::new(Events::default()),
        };
        Self { name: SERVICE_NAME.to_owned(), state: Arc::from(state) }
    }

    /// Builds the status report.
    pub async fn create_web_status(&self) -> WebStatus {
        self.state.create_web_status().await
    }

    /// Records a `warning` to be counted in the status report.
    pub async fn warning_handler<S: AsRef<str>>(&self, warning: S) {
        warn!("warning handler: {}", warning.as_ref());
        self.state.events.lock().await.warnings += 1;
    }

    /// Records an `error` to be counted in the status report.
    pub async fn error_handler<S: AsRef<str>>(&self, e: S) {
        error!("error handler: {}", e.as_ref());
        self.state.events.lock().await.errors += 1;
    }
}

impl Service for WebStatusService {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn routes(&self) -> Vec<ServiceRoute> {
        vec![ServiceRoute::new(
            Method::GET,
            "/status",
            get(handler).with_state(self.state.clone()),
        )]
    }
}

/// GET handler for the status report.
async fn handler(
    State(state): State<Arc<WebStatusState>>,
    _: EmptyBody,
) -> Response {
    info!("return the web status");
    let status = state.create_web_status().await;
    state.web.respond(state.web.create_success_response(PAYLOAD_KEY, &status, None))
}

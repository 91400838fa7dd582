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

//! Service that renders the landing page of the application.

use crate::clocks::{Clock, epoch_millis};
use crate::env::get_optional_var;
use crate::rest::{EmptyBody, Service, ServiceRoute, WebService};
use crate::template::{PageCache, apply};
use axum::extract::{ConnectInfo, State};
use axum::response::Html;
use axum::routing::get;
use http::{HeaderMap, Method};
use log::{debug, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Default name of the service.
const SERVICE_NAME: &str = "IndexPageService";

/// Page rendered when no custom body is configured.
const DEFAULT_BODY: &str = "<h2>%title%</h2>\
    <p>Copyright %copyright% --- Version %version%</p>\
    <p>env: %environment%</p>\
    <p>ts: %timestamp%</p>";

/// Configuration of the index page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexPageOptions {
    /// Title of the application.
    pub title: String,

    /// Copyright notice.
    pub copyright: String,

    /// Version of the application.
    pub version: String,

    /// Name of the environment the application runs in.
    pub environment: String,

    /// Template that replaces the default page.
    pub body: Option<String>,

    /// Template file that replaces the default page, taking precedence over `body`.
    pub body_file: Option<PathBuf>,
}

impl IndexPageOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_TITLE`, `<prefix>_COPYRIGHT` and
    /// `<prefix>_BODY_FILE`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        Ok(Self {
            title: get_optional_var::<String>(prefix, "TITLE")?.unwrap_or_default(),
            copyright: get_optional_var::<String>(prefix, "COPYRIGHT")?.unwrap_or_default(),
            version: get_optional_var::<String>(prefix, "VERSION")?.unwrap_or_default(),
            environment: get_optional_var::<String>(prefix, "ENVIRONMENT")?.unwrap_or_default(),
            body: get_optional_var::<String>(prefix, "BODY")?,
            body_file: get_optional_var::<String>(prefix, "BODY_FILE")?.map(PathBuf::from),
        })
    }
}

/// State of the index page handler.
struct IndexPageState {
    /// Clock used to stamp the page.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Page configuration.
    opts: IndexPageOptions,

    /// Cache for the body template file, if any.
    pages: Arc<PageCache>,
}

impl IndexPageState {
    /// Renders the page.
    async fn create_index_page(&self) -> String {
        let timestamp = epoch_millis(self.clock.now_utc()).to_string();
        let replacements = [
            ("title", self.opts.title.as_str()),
            ("copyright", self.opts.copyright.as_str()),
            ("version", self.opts.version.as_str()),
            ("environment", self.opts.environment.as_str()),
            ("timestamp", timestamp.as_str()),
        ];

        match (&self.opts.body_file, &self.opts.body) {
            (Some(path), _) => self.pages.render(path, &replacements).await,
            (None, Some(body)) => apply(body, &replacements),
            (None, None) => apply(DEFAULT_BODY, &replacements),
        }
    }
}

/// Service that serves the index page on `GET /`.
pub struct IndexPageService {
    /// Name of the service.
    name: String,

    /// Handler state.
    state: Arc<IndexPageState>,
}

impl IndexPageService {
    /// Creates the service with its default name.
    pub fn new(
        clock: Arc<dyn Clock + Send + Sync>,
        opts: IndexPageOptions,
        pages: Arc<PageCache>,
    ) -> Self {
        let state = IndexPageState { clock, opts, pages };
        Self { name: SERVICE_NAME.to_owned(), state: Arc::from(state) }
    }

    /// Overrides the name of the service.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Renders the index page.
    pub async fn create_index_page(&self) -> String {
        self.state.create_index_page().await
    }
}

impl Service for IndexPageService {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn routes(&self) -> Vec<ServiceRoute> {
        vec![ServiceRoute::new(Method::GET, "/", get(handler).with_state(self.state.clone()))]
    }
}

/// GET handler for the index page.
async fn handler(
    State(state): State<Arc<IndexPageState>>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    _: EmptyBody,
) -> Html<String> {
    let ip = WebService::find_ip_address(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    info!("process the request from: {}", ip.as_deref().unwrap_or("unknown"));
    let page = state.create_index_page().await;
    debug!("body {}", page);
    Html(page)
}

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

//! Request middleware shared by all services: API key and protocol checks, HTTPS redirection,
//! cross-origin headers and a local shutdown hook.
//!
//! Proxies are trusted: the client address is the first entry of `X-Forwarded-For` and the
//! protocol comes from `X-Forwarded-Proto`.  Requests from the loopback interface skip the API
//! key, protocol and HTTPS checks.

use crate::clocks::Clock;
use crate::env::get_optional_var;
use crate::rest::webservice::forwarded_ips;
use crate::rest::{RestError, RestResult};
use axum::Json;
use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use derivative::Derivative;
use http::header::{CONTENT_TYPE, HOST, LOCATION};
use http::{Method, StatusCode};
use log::{error, info, warn};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};

/// Default delay before answering a request with a bad API key.
const DEFAULT_APPKEY_TIMEOUT: Duration = Duration::from_secs(20);

/// Delay before answering a request that used a rejected protocol.
const PROTOCOL_REJECT_DELAY: Duration = Duration::from_millis(100);

/// Options to configure a `MiddlewareDelegate`.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[cfg_attr(test, derivative(PartialEq))]
pub struct MiddlewareOptions {
    /// Shared secret that clients must present in the `x-api-key` header.
    #[derivative(Debug = "ignore")]
    pub appkey: Option<String>,

    /// Time to wait before answering a request with a bad API key.
    pub appkey_timeout: Duration,

    /// Protocols (such as `https`) that clients may use.  Any protocol is accepted if empty.
    pub accepted_protocols: Vec<String>,

    /// Whether to add cross-origin resource sharing headers to responses.
    pub enable_cors: bool,

    /// Whether to verify the `x-api-key` header.
    pub include_x_api_key: bool,

    /// Whether to redirect plain HTTP requests to HTTPS.
    pub verify_secure: bool,

    /// Public host name of the service, used to build HTTPS redirections.
    pub hostname: Option<String>,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            appkey: None,
            appkey_timeout: DEFAULT_APPKEY_TIMEOUT,
            accepted_protocols: vec![],
            enable_cors: true,
            include_x_api_key: true,
            verify_secure: false,
            hostname: None,
        }
    }
}

impl MiddlewareOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_APPKEY`, `<prefix>_APPKEY_TIMEOUT`,
    /// `<prefix>_ACCEPTED_PROTOCOLS`, `<prefix>_ENABLE_CORS`, `<prefix>_INCLUDE_X_API_KEY`,
    /// `<prefix>_VERIFY_SECURE` and `<prefix>_HOSTNAME`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        Ok(Self {
            appkey: get_optional_var::<String>(prefix, "APPKEY")?,
            appkey_timeout: get_optional_var::<Duration>(prefix, "APPKEY_TIMEOUT")?
                .unwrap_or(DEFAULT_APPKEY_TIMEOUT),
            accepted_protocols: get_optional_var::<Vec<String>>(prefix, "ACCEPTED_PROTOCOLS")?
                .unwrap_or_default(),
            enable_cors: get_optional_var::<bool>(prefix, "ENABLE_CORS")?.unwrap_or(true),
            include_x_api_key: get_optional_var::<bool>(prefix, "INCLUDE_X_API_KEY")?
                .unwrap_or(true),
            verify_secure: get_optional_var::<bool>(prefix, "VERIFY_SECURE")?.unwrap_or(false),
            hostname: get_optional_var::<String>(prefix, "HOSTNAME")?,
        })
    }
}

/// Connection details of a request as seen through any proxies.
struct ClientInfo {
    /// Textual client address, or `unknown` if it cannot be determined.
    ip: String,

    /// Whether the client is on the loopback interface.
    loopback: bool,

    /// Protocol used by the client, such as `http` or `https`.
    protocol: String,
}

impl ClientInfo {
    /// Extracts the client details of `request`.
    fn from_request(request: &Request) -> Self {
        let ip = match forwarded_ips(request.headers()).into_iter().next() {
            Some(ip) => ip,
            None => match request.extensions().get::<ConnectInfo<SocketAddr>>() {
                Some(ConnectInfo(addr)) => addr.ip().to_string(),
                None => "unknown".to_owned(),
            },
        };
        let loopback =
            ip.parse::<IpAddr>().map(|ip| ip.to_canonical().is_loopback()).unwrap_or(false);

        let protocol = forwarded_proto(request).unwrap_or_else(|| "http".to_owned());

        Self { ip, loopback, protocol }
    }
}

/// Returns the protocol declared by the `X-Forwarded-Proto` header, if any.
fn forwarded_proto(request: &Request) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|proto| proto.trim().to_ascii_lowercase())
        .filter(|proto| !proto.is_empty())
}

/// Builds the delayed rejection response sent to misbehaving clients.
fn rejection(id: &str, ip: &str) -> Response {
    (StatusCode::NOT_ACCEPTABLE, Json(json!({"id": id, "ip": ip}))).into_response()
}

/// Collection of request middleware configured once per application.
pub struct MiddlewareDelegate {
    /// Configuration of the middleware.
    opts: MiddlewareOptions,

    /// Clock used to delay rejections.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Signal raised when a shutdown request is received.
    shutdown: Arc<Notify>,
}

impl MiddlewareDelegate {
    /// Creates a new delegate.  Fails if HTTPS verification is requested without a host name.
    pub fn new(opts: MiddlewareOptions, clock: Arc<dyn Clock + Send + Sync>) -> RestResult<Self> {
        if opts.verify_secure && opts.hostname.as_deref().is_none_or(str::is_empty) {
            return Err(RestError::InternalError(
                "verify_secure requires a hostname to redirect to".to_owned(),
            ));
        }
        Ok(Self { opts, clock, shutdown: Arc::from(Notify::new()) })
    }

    /// Returns the signal raised when a shutdown request is received, to be awaited by the
    /// server's graceful shutdown logic.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Rejects requests whose `x-api-key` header does not match the configured key.
    ///
    /// The rejection is only sent after `appkey_timeout` to slow down key guessing.
    pub async fn check_api_key(
        State(delegate): State<Arc<MiddlewareDelegate>>,
        request: Request,
        next: Next,
    ) -> Response {
        let client = ClientInfo::from_request(&request);
        if !delegate.opts.include_x_api_key || client.loopback {
            return next.run(request).await;
        }

        let key = request.headers().get("x-api-key").and_then(|value| value.to_str().ok());
        if key == delegate.opts.appkey.as_deref() {
            return next.run(request).await;
        }

        warn!("x-api-key mismatch for {}", request.uri());
        error!("Request with invalid key from ip {}", client.ip);
        info!("Waiting {:?} before rejecting", delegate.opts.appkey_timeout);
        delegate.clock.sleep(delegate.opts.appkey_timeout).await;
        rejection("wha?", &client.ip)
    }

    /// Rejects requests made with a protocol that is not in the accepted list.
    pub async fn check_protocol(
        State(delegate): State<Arc<MiddlewareDelegate>>,
        request: Request,
        next: Next,
    ) -> Response {
        let client = ClientInfo::from_request(&request);
        let accepted = &delegate.opts.accepted_protocols;
        if accepted.is_empty() || client.loopback || accepted.contains(&client.protocol) {
            return next.run(request).await;
        }

        warn!("Rejecting protocol {} from {}", client.protocol, client.ip);
        delegate.clock.sleep(PROTOCOL_REJECT_DELAY).await;
        rejection("rejected", &client.ip)
    }

    /// Redirects requests that a proxy received over plain HTTP to their HTTPS equivalent.
    pub async fn force_secure(
        State(delegate): State<Arc<MiddlewareDelegate>>,
        request: Request,
        next: Next,
    ) -> Response {
        let client = ClientInfo::from_request(&request);
        let plain = forwarded_proto(&request).is_some_and(|proto| proto == "http");
        if !delegate.opts.verify_secure || !plain || client.loopback {
            return next.run(request).await;
        }

        let host = request
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(':').next())
            .filter(|host| host.len() >= 3)
            .or(delegate.opts.hostname.as_deref())
            .unwrap_or_default();
        let path = request.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let url = format!("https://{}{}", host, path);
        info!("Redirecting to {}", url);
        (StatusCode::FOUND, [(LOCATION, url)]).into_response()
    }

    /// Answers `POST /shutdown` requests from the loopback interface by raising the shutdown
    /// signal.
    pub async fn shutdown(
        State(delegate): State<Arc<MiddlewareDelegate>>,
        request: Request,
        next: Next,
    ) -> Response {
        let client = ClientInfo::from_request(&request);
        if request.method() != Method::POST || request.uri().path() != "/shutdown" || !client.loopback
        {
            return next.run(request).await;
        }

        warn!("Shutdown requested from {}", client.ip);
        delegate.shutdown.notify_one();
        ([(CONTENT_TYPE, "text/plain")], "shutting down...").into_response()
    }

    /// Returns the cross-origin resource sharing layer, if enabled.
    pub fn allow_cross_domain(&self) -> Option<CorsLayer> {
        if !self.opts.enable_cors {
            return None;
        }
        Some(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::HEAD,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE]),
        )
    }

    /// Wraps `router` with the whole middleware stack.
    ///
    /// Requests go through CORS handling, the shutdown hook, HTTPS redirection, the protocol
    /// check and the API key check, in this order.
    pub fn apply(self: &Arc<Self>, router: Router) -> Router {
        let router = router
            .layer(from_fn_with_state(self.clone(), MiddlewareDelegate::check_api_key))
            .layer(from_fn_with_state(self.clone(), MiddlewareDelegate::check_protocol))
            .layer(from_fn_with_state(self.clone(), MiddlewareDelegate::force_secure))
            .layer(from_fn_with_state(self.clone(), MiddlewareDelegate::shutdown));
        match self.allow_cross_domain() {
            Some(cors) => router.layer(cors),
            None => router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clocks::testutils::SettableClock;
    use crate::rest::testutils::OneShotBuilder;
    use axum::routing::get;
    use time::macros::datetime;

    /// Remote address used by tests that need to go through the checks.
    const REMOTE: &str = "203.0.113.7:4000";

    /// Creates the clock used by the delegate.
    fn clock() -> Arc<SettableClock> {
        Arc::from(SettableClock::new(datetime!(2024-01-01 00:00:00 UTC)))
    }

    /// Builds a test app with a single `GET /hello` route wrapped with a delegate built from
    /// `opts`.  Returns the app, the clock and the delegate.
    fn setup(opts: MiddlewareOptions) -> (Router, Arc<SettableClock>, Arc<MiddlewareDelegate>) {
        let clock = clock();
        let delegate = Arc::from(MiddlewareDelegate::new(opts, clock.clone()).unwrap());
        let router = Router::new().route("/hello", get(|| async { "hello" }));
        (delegate.apply(router), clock, delegate)
    }

    /// Options with an API key and no other checks.
    fn appkey_opts() -> MiddlewareOptions {
        MiddlewareOptions { appkey: Some("secret".to_owned()), ..Default::default() }
    }

    #[test]
    fn test_options_from_env_all_present() {
        let overrides = [
            ("MW_APPKEY", Some("k")),
            ("MW_APPKEY_TIMEOUT", Some("5s")),
            ("MW_ACCEPTED_PROTOCOLS", Some("https, http")),
            ("MW_ENABLE_CORS", Some("false")),
            ("MW_INCLUDE_X_API_KEY", Some("no")),
            ("MW_VERIFY_SECURE", Some("true")),
            ("MW_HOSTNAME", Some("example.com")),
        ];
        temp_env::with_vars(overrides, || {
            assert_eq!(
                MiddlewareOptions {
                    appkey: Some("k".to_owned()),
                    appkey_timeout: Duration::from_secs(5),
                    accepted_protocols: vec!["https".to_owned(), "http".to_owned()],
                    enable_cors: false,
                    include_x_api_key: false,
                    verify_secure: true,
                    hostname: Some("example.com".to_owned()),
                },
                MiddlewareOptions::from_env("MW").unwrap()
            );
        });
    }

    #[test]
    fn test_options_from_env_use_defaults() {
        let overrides: [(&str, Option<&str>); 7] = [
            ("MW_APPKEY", None),
            ("MW_APPKEY_TIMEOUT", None),
            ("MW_ACCEPTED_PROTOCOLS", None),
            ("MW_ENABLE_CORS", None),
            ("MW_INCLUDE_X_API_KEY", None),
            ("MW_VERIFY_SECURE", None),
            ("MW_HOSTNAME", None),
        ];
        temp_env::with_vars(overrides, || {
            assert_eq!(MiddlewareOptions::default(), MiddlewareOptions::from_env("MW").unwrap());
        });
    }

    #[test]
    fn test_options_debug_hides_appkey() {
        let text = format!("{:?}", appkey_opts());
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_verify_secure_requires_hostname() {
        let opts = MiddlewareOptions { verify_secure: true, ..Default::default() };
        MiddlewareDelegate::new(opts, clock()).map(|_| ()).unwrap_err();

        let opts = MiddlewareOptions {
            verify_secure: true,
            hostname: Some("mydomain.com".to_owned()),
            ..Default::default()
        };
        MiddlewareDelegate::new(opts, clock()).unwrap();
    }

    #[tokio::test]
    async fn test_check_api_key_match() {
        let (app, _clock, _delegate) = setup(appkey_opts());
        OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("x-api-key", "secret")
            .send_empty()
            .await
            .expect_text("hello")
            .await;
    }

    #[tokio::test]
    async fn test_check_api_key_mismatch_is_delayed() {
        let (app, clock, _delegate) = setup(appkey_opts());
        let before = clock.now_utc();

        let response = OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("x-api-key", "guess")
            .send_empty()
            .await
            .expect_status(StatusCode::NOT_ACCEPTABLE)
            .expect_json::<serde_json::Value>()
            .await;
        assert_eq!(json!({"id": "wha?", "ip": "203.0.113.7"}), response);
        assert_eq!(before + Duration::from_secs(20), clock.now_utc());
    }

    #[tokio::test]
    async fn test_check_api_key_uses_forwarded_ip() {
        let (app, _clock, _delegate) = setup(appkey_opts());
        let response = OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("x-forwarded-for", "198.51.100.1, 10.0.0.1")
            .send_empty()
            .await
            .expect_status(StatusCode::NOT_ACCEPTABLE)
            .expect_json::<serde_json::Value>()
            .await;
        assert_eq!(json!({"id": "wha?", "ip": "198.51.100.1"}), response);
    }

    #[tokio::test]
    async fn test_check_api_key_skipped() {
        let opts = MiddlewareOptions { include_x_api_key: false, ..appkey_opts() };
        let (app, _clock, _delegate) = setup(opts);
        OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .send_empty()
            .await
            .expect_text("hello")
            .await;

        let (app, _clock, _delegate) = setup(appkey_opts());
        OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer("127.0.0.1:9999")
            .send_empty()
            .await
            .expect_text("hello")
            .await;
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (app, _clock, _delegate) = setup(MiddlewareOptions::default());
        let response = OneShotBuilder::new(app.clone(), (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("origin", "https://elsewhere.example")
            .send_empty()
            .await
            .take_response()
            .await;
        let origin = response.headers().get("access-control-allow-origin").unwrap();
        assert_eq!("*", origin.to_str().unwrap());

        let response = OneShotBuilder::new(app, (Method::OPTIONS, "/hello"))
            .with_peer(REMOTE)
            .with_header("origin", "https://elsewhere.example")
            .with_header("access-control-request-method", "PUT")
            .send_empty()
            .await
            .take_response()
            .await;
        let methods = response.headers().get("access-control-allow-methods").unwrap();
        let methods = methods.to_str().unwrap();
        for method in ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS"] {
            assert!(methods.contains(method), "{} missing from {}", method, methods);
        }
        let headers = response.headers().get("access-control-allow-headers").unwrap();
        assert_eq!("content-type", headers.to_str().unwrap().to_ascii_lowercase());
    }

    #[tokio::test]
    async fn test_cors_disabled() {
        let opts = MiddlewareOptions { enable_cors: false, ..Default::default() };
        let (app, _clock, _delegate) = setup(opts);
        let response = OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("origin", "https://elsewhere.example")
            .send_empty()
            .await
            .take_response()
            .await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_check_protocol() {
        let opts = MiddlewareOptions {
            accepted_protocols: vec!["https".to_owned()],
            ..Default::default()
        };

        let (app, _clock, _delegate) = setup(opts.clone());
        OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("x-forwarded-proto", "https")
            .send_empty()
            .await
            .expect_text("hello")
            .await;

        let (app, clock, _delegate) = setup(opts.clone());
        let before = clock.now_utc();
        let response = OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .send_empty()
            .await
            .expect_status(StatusCode::NOT_ACCEPTABLE)
            .expect_json::<serde_json::Value>()
            .await;
        assert_eq!(json!({"id": "rejected", "ip": "203.0.113.7"}), response);
        assert_eq!(before + Duration::from_millis(100), clock.now_utc());

        let (app, _clock, _delegate) = setup(opts);
        OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer("[::1]:8080")
            .send_empty()
            .await
            .expect_text("hello")
            .await;
    }

    /// Options that require HTTPS.
    fn secure_opts() -> MiddlewareOptions {
        MiddlewareOptions {
            verify_secure: true,
            hostname: Some("mydomain.com".to_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_force_secure_redirects() {
        let (app, _clock, _delegate) = setup(secure_opts());
        let response = OneShotBuilder::new(app.clone(), (Method::GET, "/hello?x=1"))
            .with_peer(REMOTE)
            .with_header("x-forwarded-proto", "http")
            .with_header("host", "service.example.org:8080")
            .send_empty()
            .await
            .expect_status(StatusCode::FOUND)
            .take_response()
            .await;
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert_eq!("https://service.example.org/hello?x=1", location);

        let response = OneShotBuilder::new(app, (Method::GET, "/hello"))
            .with_peer(REMOTE)
            .with_header("x-forwarded-proto", "http")
            .with_header("host", "ab")
            .send_empty()
            .await
            .expect_status(StatusCode::FOUND)
            .take_response()
            .await;
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert_eq!("https://mydomain.com/hello", location);
    }

    #[tokio::test]
    async fn test_force_secure_skipped() {
        for (peer, proto) in [(REMOTE, Some("https")), (REMOTE, None), ("127.0.0.1:1", Some("http"))]
        {
            let (app, _clock, _delegate) = setup(secure_opts());
            let mut builder = OneShotBuilder::new(app, (Method::GET, "/hello")).with_peer(peer);
            if let Some(proto) = proto {
                builder = builder.with_header("x-forwarded-proto", proto);
            }
            builder.send_empty().await.expect_text("hello").await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_from_loopback() {
        let (app, _clock, delegate) = setup(MiddlewareOptions::default());
        let signal = delegate.shutdown_signal();

        OneShotBuilder::new(app, (Method::POST, "/shutdown"))
            .with_peer("127.0.0.1:5555")
            .send_empty()
            .await
            .expect_text("^shutting down...$")
            .await;

        // The permit stored by the request makes this return immediately.
        signal.notified().await;
    }

    #[tokio::test]
    async fn test_shutdown_from_remote_ignored() {
        let (app, _clock, _delegate) = setup(MiddlewareOptions::default());
        OneShotBuilder::new(app, (Method::POST, "/shutdown"))
            .with_peer(REMOTE)
            .send_empty()
            .await
            .expect_status(StatusCode::NOT_FOUND)
            .expect_empty()
            .await;
    }
}

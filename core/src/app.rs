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

//! Assembly of services into a runnable application.

use crate::clocks::Clock;
use crate::env::get_optional_var;
use crate::rest::middleware::{MiddlewareDelegate, MiddlewareOptions};
use crate::rest::{RestError, RestResult, Service, WebServiceOptions};
use crate::validator::CommonValidator;
use axum::Router;
use log::{error, info, warn};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

/// Configuration of an application.
#[derive(Clone, Debug)]
pub struct ApplicationOptions {
    /// URI under which all service routes are mounted.
    pub base_uri: String,

    /// Name of the environment the application runs in.
    pub environment: String,

    /// Names of the web services to create through the service factory.
    pub services: Vec<String>,

    /// Configuration of the request middleware.
    pub middleware: MiddlewareOptions,

    /// Configuration of the envelope builder.
    pub web: WebServiceOptions,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            base_uri: "/".to_owned(),
            environment: "production".to_owned(),
            services: vec![],
            middleware: MiddlewareOptions::default(),
            web: WebServiceOptions::default(),
        }
    }
}

impl ApplicationOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_BASE_URI`, `<prefix>_ENVIRONMENT` and
    /// `<prefix>_SERVICES`, plus those of the middleware and web service options.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            base_uri: get_optional_var::<String>(prefix, "BASE_URI")?.unwrap_or(defaults.base_uri),
            environment: get_optional_var::<String>(prefix, "ENVIRONMENT")?
                .unwrap_or(defaults.environment),
            services: get_optional_var::<Vec<String>>(prefix, "SERVICES")?.unwrap_or_default(),
            middleware: MiddlewareOptions::from_env(prefix)?,
            web: WebServiceOptions::from_env(prefix)?,
        })
    }
}

/// Creates web services on demand given their names.
pub trait ServiceFactory {
    /// Creates the service called `name`, or returns `None` if the factory does not know it.
    fn create_service(&self, name: &str) -> Option<Arc<dyn Service>>;
}

/// Joins a `base` URI and a service `path` with a single `/` between them.
pub fn create_route_path(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Initializes logging to the console, at the info level unless configured otherwise via
/// `RUST_LOG`.  Calling this more than once has no effect.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        warn!("Logging already initialized: {}", e);
    }
}

/// Registry of the services of an application and of the components they share.
pub struct ApplicationFactory {
    /// Configuration of the application.
    opts: ApplicationOptions,

    /// Clock shared by all components.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Registered services, in registration order.
    services: Vec<Arc<dyn Service>>,

    /// Shared validator, created on first use.
    validator: Option<Arc<CommonValidator>>,

    /// Shared middleware, created on first use.
    middleware: Option<Arc<MiddlewareDelegate>>,
}

impl ApplicationFactory {
    /// Creates a new factory without services.
    pub fn new(opts: ApplicationOptions, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { opts, clock, services: vec![], validator: None, middleware: None }
    }

    /// Returns the configuration of the application.
    pub fn configuration(&self) -> &ApplicationOptions {
        &self.opts
    }

    /// Returns the validator shared by all services.
    pub fn create_common_validator(&mut self) -> Arc<CommonValidator> {
        self.validator
            .get_or_insert_with(|| {
                info!("create common validator");
                Arc::from(CommonValidator::new())
            })
            .clone()
    }

    /// Returns the middleware shared by all routes.
    pub fn create_middleware_delegate(&mut self) -> RestResult<Arc<MiddlewareDelegate>> {
        match &self.middleware {
            Some(middleware) => Ok(middleware.clone()),
            None => {
                info!("create MiddlewareDelegate");
                let middleware = Arc::from(MiddlewareDelegate::new(
                    self.opts.middleware.clone(),
                    self.clock.clone(),
                )?);
                self.middleware = Some(middleware.clone());
                Ok(middleware)
            }
        }
    }

    /// Registers `service` unless another one with the same name already exists.
    pub fn add_service(&mut self, service: Arc<dyn Service>) -> RestResult<()> {
        if service.service_name().is_empty() {
            return Err(RestError::InternalError(
                "Attempt to add a service without a service name".to_owned(),
            ));
        }
        if self.find_service(service.service_name()).is_some() {
            info!("Service {} already registered", service.service_name());
        } else {
            self.services.push(service);
        }
        Ok(())
    }

    /// Returns the service called `name`, if registered.
    pub fn find_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.iter().find(|s| s.service_name() == name).cloned()
    }

    /// Returns all registered services.
    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.services
    }

    /// Creates and registers the services in `names` that are not yet registered.
    ///
    /// Names unknown to `factory` are logged and skipped.
    pub fn create_web_services<N: AsRef<str>>(
        &mut self,
        factory: &dyn ServiceFactory,
        names: &[N],
    ) -> RestResult<&[Arc<dyn Service>]> {
        for name in names {
            let name = name.as_ref();
            if self.find_service(name).is_some() {
                continue;
            }

            info!("invoking: create{}", name);
            match factory.create_service(name) {
                Some(service) => self.add_service(service)?,
                None => error!("WebService method: create{} is not available...", name),
            }
        }
        info!("service count: {}", self.services.len());
        Ok(&self.services)
    }

    /// Mounts the routes of all registered services on `router` under the base URI.
    pub fn assign_routes(&self, mut router: Router) -> Router {
        info!("assign routes to the application");
        for service in &self.services {
            info!("add routes for {}", service.service_name());
            for route in service.routes() {
                let mut path = create_route_path(&self.opts.base_uri, route.path());
                if !path.starts_with('/') {
                    path.insert(0, '/');
                }
                info!("route path: {}, method: {}", path, route.method());
                let (_, method_router) = route.into_parts();
                router = router.route(&path, method_router);
            }
        }
        router
    }

    /// Builds the router of the application: all service routes wrapped in the middleware.
    pub fn build(&mut self) -> RestResult<Router> {
        let middleware = self.create_middleware_delegate()?;
        let router = self.assign_routes(Router::new());
        Ok(middleware.apply(router))
    }

    /// Serves the application on `bind_addr` until the middleware receives a shutdown request.
    pub async fn serve(mut self, bind_addr: impl Into<SocketAddr>) -> Result<(), Box<dyn Error>> {
        let router = self.build()?;
        let shutdown = self.create_middleware_delegate()?.shutdown_signal();

        let bind_addr = bind_addr.into();
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        info!("Listening on {} in {} mode", bind_addr, self.opts.environment);
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;
        info!("Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clocks::testutils::SettableClock;
    use crate::rest::ServiceRoute;
    use crate::rest::testutils::*;
    use http::Method;
    use std::time::Duration;
    use time::macros::datetime;

    /// Service with a single route that greets the caller.
    struct HelloService {
        /// Name of the service.
        name: String,

        /// Path of the greeting route.
        path: &'static str,
    }

    impl HelloService {
        fn boxed(name: &str, path: &'static str) -> Arc<dyn Service> {
            Arc::from(HelloService { name: name.to_owned(), path })
        }
    }

    impl Service for HelloService {
        fn service_name(&self) -> &str {
            &self.name
        }

        fn routes(&self) -> Vec<ServiceRoute> {
            let greeting = format!("hello from {}", self.name);
            let route = ServiceRoute::create(Method::GET, self.path, || async move { greeting });
            vec![route.unwrap()]
        }
    }

    /// Factory that knows how to create services named `A` and `B`.
    struct TestServiceFactory;

    impl ServiceFactory for TestServiceFactory {
        fn create_service(&self, name: &str) -> Option<Arc<dyn Service>> {
            match name {
                "A" => Some(HelloService::boxed("A", "/a")),
                "B" => Some(HelloService::boxed("B", "b")),
                _ => None,
            }
        }
    }

    fn setup(opts: ApplicationOptions) -> (ApplicationFactory, Arc<SettableClock>) {
        let clock = Arc::from(SettableClock::new(datetime!(2024-03-01 12:00:00 UTC)));
        (ApplicationFactory::new(opts, clock.clone()), clock)
    }

    #[test]
    fn test_options_from_env() {
        let overrides = [
            ("APP_BASE_URI", Some("/api/v1")),
            ("APP_ENVIRONMENT", None),
            ("APP_SERVICES", Some("IndexPageService, WebStatusService")),
            ("APP_APPKEY", Some("secret")),
            ("APP_HMAC_ALGORITHM", Some("sha256")),
        ];
        temp_env::with_vars(overrides, || {
            let opts = ApplicationOptions::from_env("APP").unwrap();
            assert_eq!("/api/v1", opts.base_uri);
            assert_eq!("production", opts.environment);
            assert_eq!(vec!["IndexPageService", "WebStatusService"], opts.services);
            assert_eq!(Some("secret".to_owned()), opts.middleware.appkey);
            assert!(opts.web.algorithm.is_some());
        });
    }

    #[test]
    fn test_create_route_path() {
        assert_eq!("/MyService/user", create_route_path("/MyService/", "/user"));
        assert_eq!("/MyService/user", create_route_path("/MyService", "user"));
        assert_eq!("/MyService/user", create_route_path("/MyService///", "///user"));
        assert_eq!("MyService/user", create_route_path("MyService", "/user"));
        assert_eq!("/", create_route_path("/", "/"));
        assert_eq!("/status", create_route_path("", "/status"));
    }

    #[test]
    fn test_add_and_find_services() {
        let (mut factory, _clock) = setup(ApplicationOptions::default());
        assert!(factory.services().is_empty());

        factory.add_service(HelloService::boxed("A", "/a")).unwrap();
        factory.add_service(HelloService::boxed("B", "/b")).unwrap();
        factory.add_service(HelloService::boxed("A", "/other")).unwrap();
        assert_eq!(2, factory.services().len());

        let a = factory.find_service("A").unwrap();
        assert_eq!("/a", a.routes()[0].path());
        assert!(factory.find_service("C").is_none());
    }

    #[test]
    fn test_add_service_without_name() {
        let (mut factory, _clock) = setup(ApplicationOptions::default());
        match factory.add_service(HelloService::boxed("", "/a")) {
            Err(RestError::InternalError(e)) => assert!(e.contains("without a service name")),
            e => panic!("Nameless services must be rejected, got {:?}", e),
        }
        assert!(factory.services().is_empty());
    }

    #[test]
    fn test_create_web_services() {
        let (mut factory, _clock) = setup(ApplicationOptions::default());
        factory.add_service(HelloService::boxed("B", "/existing")).unwrap();

        let services = factory.create_web_services(&TestServiceFactory, &["A", "B", "C"]).unwrap();
        let names = services.iter().map(|s| s.service_name().to_owned()).collect::<Vec<String>>();
        assert_eq!(vec!["B", "A"], names);
        assert_eq!("/existing", factory.find_service("B").unwrap().routes()[0].path());
    }

    #[test]
    fn test_shared_components_are_created_once() {
        let (mut factory, _clock) = setup(ApplicationOptions::default());

        let validator1 = factory.create_common_validator();
        let validator2 = factory.create_common_validator();
        assert!(Arc::ptr_eq(&validator1, &validator2));

        let middleware1 = factory.create_middleware_delegate().unwrap();
        let middleware2 = factory.create_middleware_delegate().unwrap();
        assert!(Arc::ptr_eq(&middleware1, &middleware2));
    }

    #[test]
    fn test_build_invalid_middleware() {
        let mut opts = ApplicationOptions::default();
        opts.middleware.verify_secure = true;
        let (mut factory, _clock) = setup(opts);
        factory.build().map(|_| ()).unwrap_err();
    }

    #[tokio::test]
    async fn test_build_mounts_routes_under_base_uri() {
        let opts = ApplicationOptions { base_uri: "/api/v1/".to_owned(), ..Default::default() };
        let (mut factory, _clock) = setup(opts);
        factory.create_web_services(&TestServiceFactory, &["A", "B"]).unwrap();
        let app = factory.build().unwrap();

        OneShotBuilder::new(app.clone(), (Method::GET, "/api/v1/a"))
            .send_empty()
            .await
            .expect_text("hello from A")
            .await;

        OneShotBuilder::new(app.clone(), (Method::GET, "/api/v1/b"))
            .send_empty()
            .await
            .expect_text("hello from B")
            .await;

        OneShotBuilder::new(app, (Method::GET, "/a"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .expect_empty()
            .await;
    }

    #[tokio::test]
    async fn test_build_applies_middleware() {
        let mut opts = ApplicationOptions::default();
        opts.middleware.appkey = Some("secret".to_owned());
        opts.middleware.appkey_timeout = Duration::from_secs(5);
        let (mut factory, clock) = setup(opts);
        factory.add_service(HelloService::boxed("A", "/a")).unwrap();
        let app = factory.build().unwrap();

        OneShotBuilder::new(app.clone(), (Method::GET, "/a"))
            .with_peer("203.0.113.5:1234")
            .with_header("x-api-key", "secret")
            .send_empty()
            .await
            .expect_text("hello from A")
            .await;

        let before = clock.now_utc();
        OneShotBuilder::new(app, (Method::GET, "/a"))
            .with_peer("203.0.113.5:1234")
            .with_header("x-api-key", "wrong")
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_ACCEPTABLE)
            .expect_text("wha\\?")
            .await;
        assert_eq!(before + Duration::from_secs(5), clock.now_utc());
    }
}

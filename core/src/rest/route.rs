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

//! Route descriptors and the `Service` interface implemented by all web services.

use crate::rest::{RestError, RestResult};
use axum::handler::Handler;
use axum::routing::{MethodFilter, MethodRouter, on};
use http::Method;
use std::fmt;

/// Description of a single API: the HTTP method, the path relative to the application's base URI
/// and the handler that serves it.
pub struct ServiceRoute {
    /// HTTP method served by the route.
    method: Method,

    /// Path of the route, relative to the base URI of the application.
    path: String,

    /// Router that dispatches requests to the handler.
    router: MethodRouter,
}

impl ServiceRoute {
    /// Creates a route from a prebuilt `router`, typically one whose state has already been
    /// provided with `MethodRouter::with_state`.
    pub fn new<P: Into<String>>(method: Method, path: P, router: MethodRouter) -> Self {
        Self { method, path: path.into(), router }
    }

    /// Creates a route that dispatches `method` requests on `path` to a stateless `handler`.
    pub fn create<P, H, T>(method: Method, path: P, handler: H) -> RestResult<Self>
    where
        P: Into<String>,
        H: Handler<T, ()>,
        T: 'static,
    {
        let filter = MethodFilter::try_from(method.clone()).map_err(|e| {
            RestError::InternalError(format!("Cannot route method {}: {}", method, e))
        })?;
        Ok(Self::new(method, path, on(filter, handler)))
    }

    /// Gets the HTTP method served by the route.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Gets the path of the route.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Breaks the route into its path and router.
    pub fn into_parts(self) -> (String, MethodRouter) {
        (self.path, self.router)
    }
}

impl fmt::Debug for ServiceRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Interface of a web service: a named collection of routes.
pub trait Service: Send + Sync {
    /// Returns the unique name of the service.  Services with an empty name cannot be registered.
    fn service_name(&self) -> &str;

    /// Returns the routes served by the service.
    fn routes(&self) -> Vec<ServiceRoute>;
}

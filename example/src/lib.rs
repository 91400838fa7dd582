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

//! Sample REST service that keeps an address book in a key/value store.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use iii_iv_svc_core::app::{ApplicationFactory, ApplicationOptions};
use iii_iv_svc_core::clocks::{Clock, SystemClock};
use iii_iv_svc_core::db::{DaoOptions, KvStore};
use iii_iv_svc_core::rest::{RestResult, WebService};
use iii_iv_svc_core::services::IndexPageOptions;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod driver;
pub mod model;
mod rest;
pub use rest::ALL_SERVICES;
use rest::ContactsServiceFactory;

/// Configuration of the whole service.
#[derive(Clone, Debug, Default)]
pub struct ServiceOptions {
    /// Configuration of the application shell.
    pub app: ApplicationOptions,

    /// Configuration of the index page.
    pub page: IndexPageOptions,

    /// Configuration of the contacts DAO.
    pub dao: DaoOptions,
}

impl ServiceOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let mut page = IndexPageOptions::from_env(prefix)?;
        if page.title.is_empty() {
            page.title = "Contacts".to_owned();
        }
        if page.version.is_empty() {
            page.version = env!("CARGO_PKG_VERSION").to_owned();
        }
        let app = ApplicationOptions::from_env(prefix)?;
        if page.environment.is_empty() {
            page.environment = app.environment.clone();
        }
        Ok(Self { app, page, dao: DaoOptions::from_env(prefix)? })
    }
}

/// Instantiates all the services of the application on top of `store`.
///
/// Only the services listed in the application options are created, or all of them if none are
/// listed.
pub fn create_application(
    opts: ServiceOptions,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> RestResult<ApplicationFactory> {
    let mut factory = ApplicationFactory::new(opts.app.clone(), clock.clone());
    let names = if opts.app.services.is_empty() {
        ALL_SERVICES.iter().map(|name| (*name).to_owned()).collect()
    } else {
        opts.app.services.clone()
    };

    let service_factory = ContactsServiceFactory {
        clock: clock.clone(),
        store,
        validator: factory.create_common_validator(),
        web: WebService::new(clock, opts.app.web.clone()),
        page: opts.page,
        dao: opts.dao,
        environment: opts.app.environment,
    };
    factory.create_web_services(&service_factory, &names)?;
    Ok(factory)
}

/// Instantiates all resources to serve the application on `bind_addr`.
///
/// While it'd be nice to push this responsibility to `main`, doing so would force us to expose many
/// crate-internal types to the public, which in turn would make dead code detection harder.
pub async fn serve(
    bind_addr: impl Into<SocketAddr>,
    opts: ServiceOptions,
    store: Arc<dyn KvStore>,
) -> Result<(), Box<dyn Error>> {
    let clock = Arc::from(SystemClock::default());
    let factory = create_application(opts, store, clock)?;
    factory.serve(bind_addr).await
}

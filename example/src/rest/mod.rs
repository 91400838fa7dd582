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

//! Entry point to the REST server.

use crate::driver::ContactsService;
use iii_iv_svc_core::app::ServiceFactory;
use iii_iv_svc_core::clocks::Clock;
use iii_iv_svc_core::db::{DaoOptions, KvStore};
use iii_iv_svc_core::rest::{CrudWebService, Service, WebService};
use iii_iv_svc_core::services::{
    IndexPageOptions, IndexPageService, WebStatusOptions, WebStatusService,
};
use iii_iv_svc_core::template::PageCache;
use iii_iv_svc_core::validator::CommonValidator;
use log::error;
use std::sync::Arc;

#[cfg(test)]
mod testutils;

/// Name of the service that exposes the contacts.
pub(crate) const CONTACTS_SERVICE: &str = "ContactWebService";

/// Names of all the services that this application knows how to create.
pub const ALL_SERVICES: &[&str] = &["IndexPageService", "WebStatusService", CONTACTS_SERVICE];

/// Creates the web services of the application by name.
pub(crate) struct ContactsServiceFactory {
    /// Clock shared by all services.
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,

    /// Store that holds the contacts.
    pub(crate) store: Arc<dyn KvStore>,

    /// Validator shared by all services.
    pub(crate) validator: Arc<CommonValidator>,

    /// Envelope builder shared by all services.
    pub(crate) web: WebService,

    /// Configuration of the index page.
    pub(crate) page: IndexPageOptions,

    /// Configuration of the contacts DAO.
    pub(crate) dao: DaoOptions,

    /// Name of the environment the application runs in.
    pub(crate) environment: String,
}

impl ContactsServiceFactory {
    /// Creates the web service for the contacts.
    fn create_contact_web_service(&self) -> Option<Arc<dyn Service>> {
        let data = match ContactsService::new(
            self.store.clone(),
            self.clock.clone(),
            self.validator.clone(),
            self.dao.clone(),
        ) {
            Ok(data) => data,
            Err(e) => {
                error!("Cannot create the contacts service: {}", e);
                return None;
            }
        };
        let service = CrudWebService::new(
            CONTACTS_SERVICE,
            "contacts",
            "contact",
            Arc::from(data),
            self.web.clone(),
        );
        Some(Arc::from(service))
    }
}

impl ServiceFactory for ContactsServiceFactory {
    fn create_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        match name {
            "IndexPageService" => Some(Arc::from(IndexPageService::new(
                self.clock.clone(),
                self.page.clone(),
                Arc::from(PageCache::new()),
            ))),
            "WebStatusService" => {
                let opts = WebStatusOptions {
                    version: env!("CARGO_PKG_VERSION").to_owned(),
                    environment: self.environment.clone(),
                    epoch: None,
                };
                Some(Arc::from(WebStatusService::new(self.clock.clone(), self.web.clone(), opts)))
            }
            CONTACTS_SERVICE => self.create_contact_web_service(),
            _ => None,
        }
    }
}

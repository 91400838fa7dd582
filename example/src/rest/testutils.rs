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

//! Test utilities for the REST API.

use crate::driver::{ContactsService, DOMAIN, status_index};
use crate::model::{Contact, ContactStatus};
use crate::{ServiceOptions, create_application};
use axum::Router;
use iii_iv_svc_core::clocks::testutils::SettableClock;
use iii_iv_svc_core::db::memory::MemoryStore;
use iii_iv_svc_core::db::{BaseDao, DaoOptions, KvStore};
use iii_iv_svc_core::driver::{DataService, Params};
use iii_iv_svc_core::model::EmailAddress;
use iii_iv_svc_core::services::IndexPageOptions;
use iii_iv_svc_core::validator::CommonValidator;
use std::sync::Arc;
use time::macros::datetime;

/// Sample contact.
pub(crate) fn ada() -> Contact {
    Contact::new("Ada", "Lovelace", EmailAddress::from("ada@example.com"))
}

/// Sample contact.
pub(crate) fn grace() -> Contact {
    Contact::new("Grace", "Hopper", EmailAddress::from("grace@example.com"))
}

/// State of a test, with the full application and direct access to its store.
pub(crate) struct TestContext {
    /// Clock shared by all components.
    clock: Arc<SettableClock>,

    /// Store backing the application.
    store: Arc<MemoryStore>,

    /// The application under test.
    app: Router,
}

impl TestContext {
    /// Creates the application over an empty store with the given `opts`.
    async fn setup_with_opts(opts: ServiceOptions) -> Self {
        let clock = Arc::from(SettableClock::new(datetime!(2024-03-01 12:00:00 UTC)));
        let store = Arc::from(MemoryStore::new(clock.clone()));
        let mut factory = create_application(opts, store.clone(), clock.clone()).unwrap();
        let app = factory.build().unwrap();
        Self { clock, store, app }
    }

    /// Returns the options shared by all tests.
    fn test_options() -> ServiceOptions {
        let mut opts = ServiceOptions::default();
        opts.app.base_uri = "/api".to_owned();
        opts.app.environment = "test".to_owned();
        opts.page = IndexPageOptions { title: "Contacts".to_owned(), ..Default::default() };
        opts
    }

    /// Creates the application without an API key.
    pub(crate) async fn setup() -> Self {
        Self::setup_with_opts(Self::test_options()).await
    }

    /// Creates the application requiring `appkey` from non-local clients.
    pub(crate) async fn setup_with_appkey(appkey: &str) -> Self {
        let mut opts = Self::test_options();
        opts.app.middleware.appkey = Some(appkey.to_owned());
        Self::setup_with_opts(opts).await
    }

    /// Returns the application router.
    pub(crate) fn app(&self) -> Router {
        self.app.clone()
    }

    /// Saves `contact` through the business layer and returns the saved copy.
    pub(crate) async fn put(&self, contact: Contact) -> Contact {
        let service = ContactsService::new(
            self.store.clone(),
            self.clock.clone(),
            Arc::from(CommonValidator::new()),
            DaoOptions::default(),
        )
        .unwrap();
        service.save(&Params::new(), contact).await.unwrap()
    }

    /// Reads the contact `id` straight from the store.
    pub(crate) async fn get(&self, id: &str) -> Option<Contact> {
        let dao = BaseDao::<Contact>::new(DOMAIN, self.clock.clone(), DaoOptions::default())
            .unwrap();
        dao.find_by_id(self.store.as_ref(), id).await.unwrap()
    }

    /// Returns the keys in the index of contacts with `status`.
    pub(crate) async fn index_members(&self, status: ContactStatus) -> Vec<String> {
        self.store.set_members(&status_index(status)).await.unwrap()
    }
}

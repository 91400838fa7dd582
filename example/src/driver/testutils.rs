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

//! Test utilities for the business layer.

use crate::driver::{ContactsService, DOMAIN, status_index};
use crate::model::{Contact, ContactStatus};
use iii_iv_svc_core::clocks::testutils::SettableClock;
use iii_iv_svc_core::db::memory::MemoryStore;
use iii_iv_svc_core::db::{BaseDao, DaoOptions, KvStore};
use iii_iv_svc_core::model::EmailAddress;
use iii_iv_svc_core::validator::CommonValidator;
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;

/// Sample contact.
pub(crate) fn ada() -> Contact {
    Contact::new("Ada", "Lovelace", EmailAddress::from("ada@example.com"))
}

/// Sample contact.
pub(crate) fn alan() -> Contact {
    Contact::new("Alan", "Turing", EmailAddress::from("alan@example.com")).with_phone("555-0199")
}

/// Sample contact.
pub(crate) fn grace() -> Contact {
    Contact::new("Grace", "Hopper", EmailAddress::from("grace@example.com"))
}

/// State of a test, with direct access to the store behind the service.
pub(crate) struct TestContext {
    /// Clock shared by all components.
    clock: Arc<SettableClock>,

    /// Store backing the service.
    store: Arc<MemoryStore>,

    /// Service under test.
    service: ContactsService,
}

impl TestContext {
    /// Creates a service over an empty in-memory store.
    pub(crate) fn setup() -> Self {
        let clock = Arc::from(SettableClock::new(datetime!(2024-03-01 12:00:00 UTC)));
        let store = Arc::from(MemoryStore::new(clock.clone()));
        let service = ContactsService::new(
            store.clone(),
            clock.clone(),
            Arc::from(CommonValidator::new()),
            DaoOptions::default(),
        )
        .unwrap();
        Self { clock, store, service }
    }

    /// Returns the service under test.
    pub(crate) fn service(&self) -> &ContactsService {
        &self.service
    }

    /// Moves the clock forward by `secs` seconds.
    pub(crate) fn advance_clock_secs(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
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

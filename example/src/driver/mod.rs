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

//! Business logic for the service.

use crate::model::{Contact, ContactStatus};
use async_trait::async_trait;
use iii_iv_svc_core::clocks::Clock;
use iii_iv_svc_core::db::{BaseDao, DaoOptions, KvStore};
use iii_iv_svc_core::driver::{DataService, DriverError, DriverResult, Params, parse_int};
use iii_iv_svc_core::model::Model;
use iii_iv_svc_core::validator::CommonValidator;
use log::{debug, info};
use std::sync::Arc;

#[cfg(test)]
pub(crate) mod testutils;

/// Domain of the contact records in the store.
pub(crate) const DOMAIN: &str = "Contact";

/// Maximum length of the name fields.
const MAX_NAME_LENGTH: usize = 64;

/// Maximum length of phone numbers.
const MAX_PHONE_LENGTH: usize = 20;

/// Returns the name of the index set that tracks the contacts with `status`.
///
/// Index sets live outside of the `Contact:` prefix so that domain scans never run into them.
pub(crate) fn status_index(status: ContactStatus) -> String {
    format!("ContactsByStatus:{}", status)
}

/// Parses the `status` query parameter.
fn parse_status(raw: &str) -> DriverResult<ContactStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|_| DriverError::InvalidInput(format!("Unknown contact status '{}'", raw)))
}

/// Business logic for the contacts.
#[derive(Clone)]
pub struct ContactsService {
    /// The DAO for the contact records.
    dao: Arc<BaseDao<Contact>>,

    /// The store that holds the records and their indexes.
    store: Arc<dyn KvStore>,

    /// Validator for incoming records.
    validator: Arc<CommonValidator>,
}

impl ContactsService {
    /// Creates a new service backed by the given injected components.
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock + Send + Sync>,
        validator: Arc<CommonValidator>,
        opts: DaoOptions,
    ) -> DriverResult<Self> {
        let dao = BaseDao::new(DOMAIN, clock, opts)?;
        Ok(Self { dao: Arc::from(dao), store, validator })
    }

    /// Checks the fields of `contact` that its types do not already constrain.
    fn validate(&self, contact: &Contact) -> DriverResult<()> {
        let mut errors = vec![];
        self.validator.in_length(
            Some(contact.first_name().as_str()),
            Some(1),
            Some(MAX_NAME_LENGTH),
            &mut errors,
        );
        self.validator.in_length(
            Some(contact.last_name().as_str()),
            Some(1),
            Some(MAX_NAME_LENGTH),
            &mut errors,
        );
        self.validator.in_length(
            contact.phone().as_deref(),
            None,
            Some(MAX_PHONE_LENGTH),
            &mut errors,
        );
        if errors.is_empty() { Ok(()) } else { Err(DriverError::InvalidInput(errors.join("; "))) }
    }

    /// Carries the header of the stored `previous` copy of a record over to `contact`.
    fn merge_header(contact: &mut Contact, previous: &Contact) {
        let mut base = contact.base().clone().with_version(previous.base().version().unwrap_or(0));
        if let Some(date_created) = previous.base().date_created() {
            base = base.with_date_created(date_created);
        }
        if let Some(last_updated) = previous.base().last_updated() {
            base = base.with_last_updated(last_updated);
        }
        *contact.base_mut() = base;
    }
}

#[async_trait]
impl DataService for ContactsService {
    type Model = Contact;

    async fn query(&self, params: &Params) -> DriverResult<Vec<Contact>> {
        let mut contacts = match params.get("status") {
            Some(status) => {
                let index = status_index(parse_status(status)?);
                self.dao.query_by_index_set(self.store.as_ref(), &index).await?
            }
            None => self.dao.query(self.store.as_ref()).await?,
        };
        contacts.sort_by(|a, b| {
            (a.last_name(), a.first_name()).cmp(&(b.last_name(), b.first_name()))
        });

        let limit = parse_int(params.get("limit").map(String::as_str), 0);
        if limit > 0 {
            contacts.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        debug!("Query {:?} returned {} contacts", params, contacts.len());
        Ok(contacts)
    }

    async fn find(&self, params: &Params) -> DriverResult<Option<Contact>> {
        let id = params
            .get("id")
            .ok_or_else(|| DriverError::InvalidInput("Missing contact id".to_owned()))?;
        Ok(self.dao.find_by_id(self.store.as_ref(), id).await?)
    }

    async fn save(&self, _params: &Params, mut contact: Contact) -> DriverResult<Contact> {
        self.validate(&contact)?;

        let previous = match contact.base().id() {
            Some(id) => self.dao.find_by_id(self.store.as_ref(), id).await?,
            None => None,
        };
        let saved = match &previous {
            Some(previous) => {
                Self::merge_header(&mut contact, previous);
                self.dao.update(self.store.as_ref(), &contact).await?
            }
            None => self.dao.insert(self.store.as_ref(), &contact).await?,
        };

        let id = saved.base().id().ok_or_else(|| {
            DriverError::BackendError("Saved contact must have an id".to_owned())
        })?;
        let key = self.dao.domain_key(id)?;
        if let Some(previous) = previous {
            if previous.status() != saved.status() {
                self.store.remove_from_set(&status_index(*previous.status()), &key).await?;
            }
        }
        self.store.add_to_set(&status_index(*saved.status()), &key).await?;

        info!("Saved contact {} with version {:?}", key, saved.base().version());
        Ok(saved)
    }
}

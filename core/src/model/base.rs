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

//! The `BaseModel` record header and the `Model` trait.

use crate::model::coerce::{opt_timestamp, opt_version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Common header of every persisted record.
///
/// All fields are optional because a record that has not been saved yet lacks them.  The DAO
/// assigns them on first write and keeps them current on every update.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModel {
    /// Identifier of the record, unique within the domain of its DAO.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    /// Time when the record was first saved.
    #[serde(default, with = "opt_timestamp", skip_serializing_if = "Option::is_none")]
    date_created: Option<OffsetDateTime>,

    /// Time of the most recent save of the record.
    #[serde(default, with = "opt_timestamp", skip_serializing_if = "Option::is_none")]
    last_updated: Option<OffsetDateTime>,

    /// Number of times the record has been saved.
    #[serde(default, with = "opt_version", skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
}

impl BaseModel {
    /// Creates an empty header, as used by records that were never saved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identifier of the record.
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the creation timestamp of the record.
    pub fn with_date_created(mut self, date_created: OffsetDateTime) -> Self {
        self.date_created = Some(date_created);
        self
    }

    /// Sets the last update timestamp of the record.
    pub fn with_last_updated(mut self, last_updated: OffsetDateTime) -> Self {
        self.last_updated = Some(last_updated);
        self
    }

    /// Sets the version of the record.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Gets the identifier of the record, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Gets the creation timestamp of the record, if any.
    pub fn date_created(&self) -> Option<OffsetDateTime> {
        self.date_created
    }

    /// Gets the last update timestamp of the record, if any.
    pub fn last_updated(&self) -> Option<OffsetDateTime> {
        self.last_updated
    }

    /// Gets the version of the record, if any.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Replaces the identifier of the record.
    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    /// Replaces the creation timestamp of the record.
    pub(crate) fn set_date_created(&mut self, date_created: OffsetDateTime) {
        self.date_created = Some(date_created);
    }

    /// Replaces the last update timestamp of the record.
    pub(crate) fn set_last_updated(&mut self, last_updated: OffsetDateTime) {
        self.last_updated = Some(last_updated);
    }

    /// Replaces the version of the record.
    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }
}

/// Interface of every type that can be persisted by `crate::db::BaseDao`.
///
/// Implementations are expected to embed a `BaseModel` with `#[serde(flatten)]` so that the
/// header fields appear at the top level of the serialized record.
pub trait Model: Clone + DeserializeOwned + Serialize + Send + Sync {
    /// Returns the header of the record.
    fn base(&self) -> &BaseModel;

    /// Returns a mutable reference to the header of the record.
    fn base_mut(&mut self) -> &mut BaseModel;
}

impl Model for BaseModel {
    fn base(&self) -> &BaseModel {
        self
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        self
    }
}

/// A record with a `BaseModel` header and arbitrary additional fields.
///
/// Useful for services that pass records through without interpreting them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct GenericModel {
    /// Header of the record.
    #[serde(flatten)]
    base: BaseModel,

    /// All other top-level fields of the record.
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl GenericModel {
    /// Creates a new record with an empty header and no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the field `key` with `value`.
    pub fn with_field<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Gets the value of the field `key`, if present.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Gets all fields other than the header.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Model for GenericModel {
    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

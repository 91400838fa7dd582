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

//! High-level data types.

use derive_getters::Getters;
use derive_more::Display;
use iii_iv_svc_core::model::{BaseModel, EmailAddress, Model};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a contact.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// The contact can be reached.
    #[default]
    #[display("active")]
    Active,

    /// The contact has been retired.
    #[display("inactive")]
    Inactive,
}

/// A person in the address book.
#[derive(Clone, Debug, Deserialize, Getters, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Record header.
    #[serde(flatten)]
    #[getter(skip)]
    base: BaseModel,

    /// Given name.
    first_name: String,

    /// Family name.
    last_name: String,

    /// Email address.
    email: EmailAddress,

    /// Phone number in free form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<String>,

    /// Lifecycle state.
    #[serde(default)]
    status: ContactStatus,
}

impl Contact {
    /// Creates a new active contact that has never been persisted.
    pub fn new<F, L>(first_name: F, last_name: L, email: EmailAddress) -> Self
    where
        F: Into<String>,
        L: Into<String>,
    {
        Self {
            base: BaseModel::new(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email,
            phone: None,
            status: ContactStatus::default(),
        }
    }

    /// Sets the phone number.
    pub fn with_phone<S: Into<String>>(mut self, phone: S) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Sets the lifecycle state.
    pub fn with_status(mut self, status: ContactStatus) -> Self {
        self.status = status;
        self
    }
}

impl Model for Contact {
    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseModel {
        &mut self.base
    }
}

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

//! Generic business logic for any service.
//!
//! Every service should implement its own data service type on top of `DataService`.  In most
//! cases, this type will hold a `BaseDao` and a handle to the store, and as such the definition
//! will look like this:
//!
//! ```rust
//! use iii_iv_svc_core::db::{BaseDao, KvStore};
//! use iii_iv_svc_core::model::GenericModel;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! pub(crate) struct OrdersService {
//!     /// The DAO that persists orders.
//!     dao: Arc<BaseDao<GenericModel>>,
//!
//!     /// The store that the DAO writes to.
//!     store: Arc<dyn KvStore>,
//!
//!     // ... other fields here ...
//! }
//! ```
//!
//! The web layer only ever talks to data services through the `DataService` trait, passing along
//! the request parameters as a string map.

use crate::db::DbError;
use crate::model::{Model, ModelError};
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;

/// Business logic errors.  These errors encompass backend and logical errors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// Catch-all error type for unexpected store errors.
    #[error("{0}")]
    BackendError(String),

    /// Indicates an error in the input data.
    #[error("{0}")]
    InvalidInput(String),

    /// Indicates that a requested entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Indicates that the service does not provide the requested operation.
    #[error("{0}")]
    NotImplemented(String),
}

impl From<DbError> for DriverError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::BackendError(_) => DriverError::BackendError(e.to_string()),
            DbError::DataIntegrityError(_) => DriverError::BackendError(e.to_string()),
            DbError::InvalidArgument(_) => DriverError::InvalidInput(e.to_string()),
            DbError::NotFound => DriverError::NotFound(e.to_string()),
            DbError::QueryTooLarge(..) => DriverError::BackendError(e.to_string()),
            DbError::Timeout(_) => DriverError::BackendError(e.to_string()),
        }
    }
}

impl From<ModelError> for DriverError {
    fn from(e: ModelError) -> Self {
        DriverError::InvalidInput(e.to_string())
    }
}

/// Result type for this module.
pub type DriverResult<T> = Result<T, DriverError>;

/// Request parameters handed to data services: path parameters and query string entries.
pub type Params = HashMap<String, String>;

/// Message returned by the operations that a data service does not override.
const NOT_IMPLEMENTED: &str = "not implemented yet";

/// Operations that a web service invokes on the data layer.
///
/// All operations default to failing with `DriverError::NotImplemented` so that services only
/// need to provide the ones they expose.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Type of the records handled by this service.
    type Model: Model + 'static;

    /// Returns the list of records that match `params`.
    async fn query(&self, params: &Params) -> DriverResult<Vec<Self::Model>> {
        info!("query records: {:?}", params);
        Err(DriverError::NotImplemented(NOT_IMPLEMENTED.to_owned()))
    }

    /// Returns the single record identified by `params`, if it exists.
    async fn find(&self, params: &Params) -> DriverResult<Option<Self::Model>> {
        info!("find the record: {:?}", params);
        Err(DriverError::NotImplemented(NOT_IMPLEMENTED.to_owned()))
    }

    /// Inserts or updates `model` and returns the saved copy.
    async fn save(&self, params: &Params, model: Self::Model) -> DriverResult<Self::Model> {
        info!("save the record {:?}: {:?}", model.base().id(), params);
        Err(DriverError::NotImplemented(NOT_IMPLEMENTED.to_owned()))
    }
}

/// Parses the leading integer of `value`, returning `default` if there is none.
///
/// Leading whitespace and a sign are accepted, and anything after the digits is ignored, so
/// `" 12px"` yields 12.
pub fn parse_int(value: Option<&str>, default: i64) -> i64 {
    let Some(value) = value else {
        return default;
    };
    let value = value.trim_start();

    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    if end == 0 {
        return default;
    }

    match digits[..end].parse::<i64>() {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => default,
    }
}

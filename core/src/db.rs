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

//! Generic abstraction to access Redis-like key/value stores.
//!
//! The facilities in this module provide an abstraction over the handful of store operations that
//! services need (`KvStore`) and a generic data-access object (`BaseDao`) that persists `Model`
//! records on top of it.  The Redis backend is for production use and the in-memory backend is
//! primarily intended to support unit tests.

use crate::model::ModelError;
use async_trait::async_trait;

mod dao;
pub use dao::{BaseDao, DaoOptions, RawModel};
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

/// Database errors.  Any unexpected errors that come from the store are classified as
/// `BackendError`, but errors we know about have more specific types.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbError {
    /// Catch-all error type for unexpected store errors.
    #[error("Database error: {0}")]
    BackendError(String),

    /// Indicates a failure processing the data that already exists in the store.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// Indicates that the caller supplied an unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Indicates that a requested entry does not exist.
    #[error("Entity not found")]
    NotFound,

    /// Indicates that a scan matched more keys than the configured limit.
    #[error("Query too large: {0} keys exceed the limit of {1}")]
    QueryTooLarge(usize, usize),

    /// Indicates that the store did not answer within the configured deadline.
    #[error("Store operation timed out: {0}")]
    Timeout(String),
}

impl From<ModelError> for DbError {
    fn from(e: ModelError) -> Self {
        DbError::DataIntegrityError(e.to_string())
    }
}

/// Result type for this module.
pub type DbResult<T> = Result<T, DbError>;

/// Abstraction over a Redis-like key/value store.
///
/// Values are opaque strings.  Sets are unordered collections of strings, typically holding the
/// keys of records that belong to a named index.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Gets the value stored at `key`, if any.
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    /// Stores `value` at `key`, replacing any previous value and clearing any expiration.
    async fn set(&self, key: &str, value: String) -> DbResult<()>;

    /// Stores `value` at `key` so that it vanishes after `ttl_seconds`.
    async fn set_with_expiry(&self, key: &str, value: String, ttl_seconds: u64) -> DbResult<()>;

    /// Lists the keys that match `pattern`, where `*` matches any sequence of characters.
    ///
    /// The order of the returned keys is unspecified.
    async fn keys_matching(&self, pattern: &str) -> DbResult<Vec<String>>;

    /// Lists the members of the set `name`.  A missing set is empty.
    async fn set_members(&self, name: &str) -> DbResult<Vec<String>>;

    /// Gets the values of all `keys` in one round trip, preserving their order.
    async fn multi_get(&self, keys: &[String]) -> DbResult<Vec<Option<String>>>;

    /// Adds `member` to the set `name`, creating the set if necessary.
    async fn add_to_set(&self, name: &str, member: &str) -> DbResult<()>;

    /// Removes `member` from the set `name`.  Removing an absent member is not an error.
    async fn remove_from_set(&self, name: &str, member: &str) -> DbResult<()>;
}

/// Macros to help instantiate tests for multiple store backends.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    pub use paste::paste;

    /// Instantiates the `module::name` test for the store configured by `setup`.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_one_test [
        ( $name:ident, $setup:expr, $module:path $(, #[$extra:meta] )? ) => {
            #[tokio::test]
            $(#[$extra])?
            async fn $name() {
                $crate::db::testutils::paste! {
                    $module :: [< $name >]($setup).await;
                }
            }
        }
    ];

    pub use generate_one_test;

    /// Instantiates a collection of tests for a specific store backend.
    ///
    /// The store implementation to run the tests against is determined by the `setup`
    /// expression, which needs to return an `Arc<dyn KvStore>` that starts out empty.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_tests [
        ( #[$extra:meta], $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module, #[$extra]);
            )+
        };

        ( $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module);
            )+
        };
    ];

    pub use generate_tests;
}

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

//! Generic data types shared by all services.
//!
//! Every record persisted through `crate::db::BaseDao` is a `Model`: a domain-specific type that
//! embeds a `BaseModel` with the identifier, timestamps and version of the record.

mod base;
pub use base::{BaseModel, GenericModel, Model};
pub mod coerce;
mod emailaddress;
pub use emailaddress::EmailAddress;

/// Model errors.  These are used to report values that do not satisfy the rules of a type.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// Result type for this module.
pub type ModelResult<T> = Result<T, ModelError>;

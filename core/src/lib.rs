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

//! Rudimentary framework to build JSON web services backed by a key/value store.
//!
//! Services built using this framework adhere to the following layered architecture, and they
//! should structure their code to have these modules as well:
//!
//! 1.  `model`: This is the base layer, providing high-level data types that represent concepts in
//!     the domain of the application.  Persisted types embed a `model::BaseModel` and implement
//!     the `model::Model` trait so that they carry an identifier, timestamps and a version.
//!
//! 1.  `db`: This is the persistence layer.  Services instantiate a `db::BaseDao` for each of
//!     their domains and pass it a `db::KvStore` on every call.
//!
//! 1.  `driver`: This is the business logic layer.  Services provide their own types that
//!     implement `driver::DataService` to coordinate access to the store.
//!
//! 1.  `rest`: This is the HTTP layer, offering the REST APIs.  Services expose their routes as
//!     `rest::ServiceRoute`s grouped in `rest::Service`s and wrap every response in a
//!     `rest::ServiceResponse` envelope.
//!
//! 1.  `main`: This is the app launcher.  It sole purpose is to gather configuration data from
//!     environment variables and hand it to an `app::ApplicationFactory` to assemble and serve the
//!     application.
//!
//! There are result and error types in every layer, such as `DbResult` and `DbError`.  Errors can
//! transparently float to the top of the app using the `?` operator, being translated to failed
//! envelopes and HTTP status codes once returned from the REST layer.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

pub mod app;
pub mod clocks;
pub mod db;
pub mod driver;
pub mod env;
pub mod model;
pub mod rest;
pub mod services;
pub mod socket;
pub mod template;
pub mod validator;

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

//! Entry point to the sample service.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use iii_iv_svc_core::app::init_logging;
use iii_iv_svc_core::clocks::SystemClock;
use iii_iv_svc_core::db::KvStore;
use iii_iv_svc_core::db::memory::MemoryStore;
use iii_iv_svc_core::db::redis::{RedisOptions, RedisStore};
use iii_iv_svc_core::env::get_optional_var;
use iii_iv_svc_example::{ServiceOptions, serve};
use log::warn;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    init_logging();

    let port = get_optional_var::<u16>("CONTACTS", "PORT")
        .expect("Port has to be a number")
        .unwrap_or(3000);
    let addr = (Ipv4Addr::LOCALHOST, port);

    let opts = ServiceOptions::from_env("CONTACTS").unwrap();
    let store: Arc<dyn KvStore> = match RedisOptions::from_env("REDIS") {
        Ok(redis_opts) => Arc::from(RedisStore::connect(redis_opts).await.unwrap()),
        Err(e) => {
            warn!("Using a volatile in-memory store: {}", e);
            Arc::from(MemoryStore::new(Arc::from(SystemClock::default())))
        }
    };

    serve(addr, opts, store).await.unwrap()
}

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

//! Generic data-access object for `Model` records kept in a `KvStore`.

use crate::clocks::Clock;
use crate::db::{DbError, DbResult, KvStore};
use crate::env::get_optional_var;
use crate::model::Model;
use log::debug;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for every individual store operation.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options to configure a `BaseDao`.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct DaoOptions {
    /// Maximum time to wait for any single store operation.
    pub store_timeout: Duration,

    /// Maximum number of keys that a domain scan may visit.  Unbounded if `None`.
    pub max_scan_rows: Option<usize>,
}

impl Default for DaoOptions {
    fn default() -> Self {
        Self { store_timeout: DEFAULT_STORE_TIMEOUT, max_scan_rows: None }
    }
}

impl DaoOptions {
    /// Creates a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_STORE_TIMEOUT` and `<prefix>_MAX_SCAN_ROWS`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        Ok(Self {
            store_timeout: get_optional_var::<Duration>(prefix, "STORE_TIMEOUT")?
                .unwrap_or(DEFAULT_STORE_TIMEOUT),
            max_scan_rows: get_optional_var::<usize>(prefix, "MAX_SCAN_ROWS")?,
        })
    }
}

/// Serialized representation of a record as handed to `BaseDao::parse_model`.
#[derive(Clone, Debug, PartialEq)]
pub enum RawModel {
    /// A record as a JSON document, as read from the store.
    Text(String),

    /// A record that has already been parsed into a JSON value.
    Json(Value),
}

impl From<String> for RawModel {
    fn from(value: String) -> Self {
        RawModel::Text(value)
    }
}

impl From<&str> for RawModel {
    fn from(value: &str) -> Self {
        RawModel::Text(value.to_owned())
    }
}

impl From<Value> for RawModel {
    fn from(value: Value) -> Self {
        RawModel::Json(value)
    }
}

/// Data-access object that persists records of type `M` under a domain.
///
/// Every record lives at the key `<domain>:<id>` as a JSON document.  The DAO holds no store
/// connection: callers pass the store to every operation, which lets a single DAO serve any
/// number of stores and makes the DAO trivially shareable.
///
/// Records are written without reading them back and without checking their previous version,
/// so concurrent updates of the same record are resolved as last-writer-wins.
pub struct BaseDao<M> {
    /// Prefix of all keys managed by this DAO.
    domain: String,

    /// Clock used to stamp records.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Configuration of the DAO.
    opts: DaoOptions,

    /// Marker for the type of the records.
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> BaseDao<M> {
    /// Creates a new DAO for the records of `domain`, stamping them with times from `clock`.
    pub fn new<S: Into<String>>(
        domain: S,
        clock: Arc<dyn Clock + Send + Sync>,
        opts: DaoOptions,
    ) -> DbResult<Self> {
        let domain = domain.into();
        if domain.is_empty() {
            return Err(DbError::InvalidArgument("DAO domain cannot be empty".to_owned()));
        }
        Ok(Self { domain, clock, opts, _model: PhantomData })
    }

    /// Returns the domain of this DAO.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the store key for the record `id`.
    ///
    /// Ids that already start with the domain are returned unchanged so that keys can be passed
    /// where ids are expected.
    pub fn domain_key(&self, id: &str) -> DbResult<String> {
        if id.is_empty() {
            return Err(DbError::InvalidArgument("Record id cannot be empty".to_owned()));
        }
        if id.starts_with(&self.domain) {
            Ok(id.to_owned())
        } else {
            Ok(format!("{}:{}", self.domain, id))
        }
    }

    /// Generates a new record id: a random UUID as 32 lowercase hex digits.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Returns a copy of `model` ready to be written.
    ///
    /// Assigns an id, a creation time and an initial version of 0 if missing, and always stamps
    /// the last update time.  The last update time strictly advances on every call even if the
    /// clock has not moved, and it is never earlier than the creation time.
    ///
    /// Fails with `InvalidArgument` if the previous update time is so far in the future that it
    /// cannot be advanced.
    pub fn prepare_for_write(&self, model: &M) -> DbResult<M> {
        let mut model = model.clone();
        let now = self.clock.now_utc();

        let base = model.base_mut();
        if base.id().is_none_or(str::is_empty) {
            base.set_id(Self::new_id());
        }
        let date_created = base.date_created().unwrap_or(now);
        base.set_date_created(date_created);
        let mut last_updated = match base.last_updated() {
            Some(previous) if previous >= now => previous
                .checked_add(time::Duration::milliseconds(1))
                .ok_or_else(|| {
                    DbError::InvalidArgument(format!("Last update time {} is out of range", previous))
                })?,
            _ => now,
        };
        if last_updated < date_created {
            last_updated = date_created;
        }
        base.set_last_updated(last_updated);
        if base.version().is_none() {
            base.set_version(0);
        }

        Ok(model)
    }

    /// Runs the store operation `fut`, named `what`, subject to the configured deadline.
    async fn call<T, F>(&self, what: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match tokio::time::timeout(self.opts.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DbError::Timeout(format!(
                "{} in domain {} took longer than {:?}",
                what, self.domain, self.opts.store_timeout
            ))),
        }
    }

    /// Writes the prepared `model` to the store, with an expiration if `ttl_seconds` is given.
    async fn write(&self, store: &dyn KvStore, model: M, ttl_seconds: Option<u64>) -> DbResult<M> {
        let id = model.base().id().ok_or_else(|| {
            DbError::DataIntegrityError("Prepared record must have an id".to_owned())
        })?;
        let key = self.domain_key(id)?;
        let json = serde_json::to_string(&model)
            .map_err(|e| DbError::DataIntegrityError(format!("Cannot serialize record: {}", e)))?;

        match ttl_seconds {
            None => self.call("set", store.set(&key, json)).await?,
            Some(ttl) => self.call("set_with_expiry", store.set_with_expiry(&key, json, ttl)).await?,
        }
        debug!("Wrote {} with version {:?}", key, model.base().version());
        Ok(model)
    }

    /// Inserts `model` into the store and returns the written copy.
    ///
    /// The returned record is the local copy that was written, not a fresh read.
    pub async fn insert(&self, store: &dyn KvStore, model: &M) -> DbResult<M> {
        let model = self.prepare_for_write(model)?;
        self.write(store, model, None).await
    }

    /// Updates `model` in the store, incrementing its version, and returns the written copy.
    ///
    /// There is no optimistic concurrency check: two writers that start from version N both
    /// write N+1 and the last one wins.
    pub async fn update(&self, store: &dyn KvStore, model: &M) -> DbResult<M> {
        let model = self.prepare_update(model)?;
        self.write(store, model, None).await
    }

    /// Like `update` but makes the record vanish from the store after `ttl_seconds`.
    ///
    /// A zero `ttl_seconds` is rejected without writing anything.
    pub async fn update_and_expire(
        &self,
        store: &dyn KvStore,
        model: &M,
        ttl_seconds: u64,
    ) -> DbResult<M> {
        if ttl_seconds == 0 {
            return Err(DbError::InvalidArgument("Expiration must be at least 1 second".to_owned()));
        }
        let model = self.prepare_update(model)?;
        self.write(store, model, Some(ttl_seconds)).await
    }

    /// Prepares `model` for writing and bumps its version.
    fn prepare_update(&self, model: &M) -> DbResult<M> {
        let mut model = self.prepare_for_write(model)?;
        let base = model.base_mut();
        let version = base.version().unwrap_or(0);
        base.set_version(version + 1);
        Ok(model)
    }

    /// Looks up the record `id`.  A missing record is not an error.
    pub async fn find_by_id(&self, store: &dyn KvStore, id: &str) -> DbResult<Option<M>> {
        let key = self.domain_key(id)?;
        match self.call("get", store.get(&key)).await? {
            Some(raw) => Ok(Some(self.parse_model(raw)?)),
            None => Ok(None),
        }
    }

    /// Returns all records of the domain.
    ///
    /// This is a linear scan of every key that matches `<domain>:*` with one read per key, issued
    /// one after the other and stopping at the first failure.  It is only suitable for domains
    /// with a few hundred records and requires that no other kind of data (such as index sets)
    /// lives under the domain prefix.
    pub async fn query(&self, store: &dyn KvStore) -> DbResult<Vec<M>> {
        let pattern = format!("{}:*", self.domain);
        let keys = self.call("keys_matching", store.keys_matching(&pattern)).await?;
        if let Some(max) = self.opts.max_scan_rows {
            if keys.len() > max {
                return Err(DbError::QueryTooLarge(keys.len(), max));
            }
        }

        let mut models = Vec::with_capacity(keys.len());
        for key in keys {
            match self.call("get", store.get(&key)).await? {
                Some(raw) => models.push(self.parse_model(raw)?),
                None => debug!("Key {} vanished during scan; skipping", key),
            }
        }
        Ok(models)
    }

    /// Returns the records whose keys are members of the set `name`.
    ///
    /// Members whose record no longer exists are skipped.
    pub async fn query_by_index_set(&self, store: &dyn KvStore, name: &str) -> DbResult<Vec<M>> {
        let keys = self.call("set_members", store.set_members(name)).await?;
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let values = self.call("multi_get", store.multi_get(&keys)).await?;
        self.parse_model_list(values)
    }

    /// Parses a single record.
    pub fn parse_model<R: Into<RawModel>>(&self, raw: R) -> DbResult<M> {
        let result = match raw.into() {
            RawModel::Text(text) => serde_json::from_str(&text),
            RawModel::Json(value) => serde_json::from_value(value),
        };
        result.map_err(|e| {
            DbError::DataIntegrityError(format!("Invalid record in domain {}: {}", self.domain, e))
        })
    }

    /// Parses a list of records, skipping the missing ones.
    pub fn parse_model_list<R, I>(&self, raws: I) -> DbResult<Vec<M>>
    where
        R: Into<RawModel>,
        I: IntoIterator<Item = Option<R>>,
    {
        raws.into_iter().flatten().map(|raw| self.parse_model(raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clocks::testutils::SettableClock;
    use crate::db::memory::MemoryStore;
    use crate::model::{BaseModel, GenericModel};
    use serde_json::json;
    use time::macros::datetime;

    /// State of a test, with a DAO over generic records backed by an in-memory store.
    struct TestContext {
        /// Clock shared by the DAO and the store.
        clock: Arc<SettableClock>,

        /// The store under test.
        store: MemoryStore,

        /// The DAO under test.
        dao: BaseDao<GenericModel>,
    }

    impl TestContext {
        /// Sets up a new test context for the domain `MyDomainName` with `opts`.
        fn setup_with_opts(opts: DaoOptions) -> Self {
            let _can_fail = env_logger::builder().is_test(true).try_init();
            let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 08:00:00 UTC)));
            let store = MemoryStore::new(clock.clone());
            let dao = BaseDao::new("MyDomainName", clock.clone(), opts).unwrap();
            Self { clock, store, dao }
        }

        /// Sets up a new test context with default options.
        fn setup() -> Self {
            Self::setup_with_opts(DaoOptions::default())
        }

        /// Inserts `count` records named `name` and returns them.
        async fn insert_many(&self, name: &str, count: usize) -> Vec<GenericModel> {
            let mut models = vec![];
            for _ in 0..count {
                let model = GenericModel::new().with_field("name", name);
                models.push(self.dao.insert(&self.store, &model).await.unwrap());
            }
            models
        }
    }

    #[test]
    fn test_options_from_env_all_present() {
        let overrides =
            [("DAO_STORE_TIMEOUT", Some("250ms")), ("DAO_MAX_SCAN_ROWS", Some("500"))];
        temp_env::with_vars(overrides, || {
            let opts = DaoOptions::from_env("DAO").unwrap();
            assert_eq!(
                DaoOptions { store_timeout: Duration::from_millis(250), max_scan_rows: Some(500) },
                opts
            );
        });
    }

    #[test]
    fn test_options_from_env_use_defaults() {
        let overrides: [(&str, Option<&str>); 2] =
            [("DAO_STORE_TIMEOUT", None), ("DAO_MAX_SCAN_ROWS", None)];
        temp_env::with_vars(overrides, || {
            assert_eq!(DaoOptions::default(), DaoOptions::from_env("DAO").unwrap());
        });
    }

    #[test]
    fn test_new_rejects_empty_domain() {
        let clock = Arc::from(SettableClock::new(datetime!(2023-06-01 08:00:00 UTC)));
        match BaseDao::<BaseModel>::new("", clock, DaoOptions::default()) {
            Err(DbError::InvalidArgument(e)) => assert!(e.contains("domain")),
            _ => panic!("Empty domain must be rejected"),
        }
    }

    #[test]
    fn test_domain_key() {
        let context = TestContext::setup();
        let dao = &context.dao;

        assert_eq!("MyDomainName:12345", dao.domain_key("12345").unwrap());
        assert_eq!("MyDomainName:12345", dao.domain_key("MyDomainName:12345").unwrap());
        for id in ["a", "MyDomain", "x:y"] {
            let key = dao.domain_key(id).unwrap();
            assert_eq!(key, dao.domain_key(&key).unwrap());
        }
        dao.domain_key("").unwrap_err();
    }

    #[test]
    fn test_new_id() {
        let id1 = BaseDao::<GenericModel>::new_id();
        let id2 = BaseDao::<GenericModel>::new_id();
        assert_eq!(32, id1.len());
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_prepare_for_write_new_record() {
        let context = TestContext::setup();
        let input = GenericModel::new().with_field("name", "flarb");

        let prepared = context.dao.prepare_for_write(&input).unwrap();
        assert_eq!(None, input.base().id());
        assert_eq!(32, prepared.base().id().unwrap().len());
        assert_eq!(Some(datetime!(2023-06-01 08:00:00 UTC)), prepared.base().date_created());
        assert_eq!(Some(datetime!(2023-06-01 08:00:00 UTC)), prepared.base().last_updated());
        assert_eq!(Some(0), prepared.base().version());
        assert_eq!(Some(&json!("flarb")), prepared.field("name"));
    }

    #[test]
    fn test_prepare_for_write_twice() {
        let context = TestContext::setup();
        let first = context.dao.prepare_for_write(&GenericModel::new()).unwrap();

        // The clock has not moved but the update time must still advance.
        let second = context.dao.prepare_for_write(&first).unwrap();
        assert_eq!(first.base().id(), second.base().id());
        assert_eq!(first.base().date_created(), second.base().date_created());
        assert_eq!(Some(datetime!(2023-06-01 08:00:00.001 UTC)), second.base().last_updated());
        assert_eq!(Some(0), second.base().version());

        context.clock.advance(Duration::from_secs(5));
        let third = context.dao.prepare_for_write(&second).unwrap();
        assert_eq!(first.base().date_created(), third.base().date_created());
        assert_eq!(Some(datetime!(2023-06-01 08:00:05 UTC)), third.base().last_updated());
    }

    #[test]
    fn test_prepare_for_write_empty_id_replaced() {
        let context = TestContext::setup();
        let mut input = GenericModel::new();
        input.base_mut().set_id(String::new());
        let prepared = context.dao.prepare_for_write(&input).unwrap();
        assert_eq!(32, prepared.base().id().unwrap().len());
    }

    #[test]
    fn test_prepare_for_write_future_date_created() {
        let context = TestContext::setup();
        let mut input = GenericModel::new();
        input.base_mut().set_date_created(datetime!(2999-01-01 00:00:00 UTC));

        let prepared = context.dao.prepare_for_write(&input).unwrap();
        assert_eq!(Some(datetime!(2999-01-01 00:00:00 UTC)), prepared.base().date_created());
        assert_eq!(Some(datetime!(2999-01-01 00:00:00 UTC)), prepared.base().last_updated());
        assert!(prepared.base().date_created() <= prepared.base().last_updated());
    }

    #[tokio::test]
    async fn test_insert_max_last_updated() {
        let context = TestContext::setup();
        let model = context
            .dao
            .parse_model(json!({"id": "late", "lastUpdated": "9999-12-31T23:59:59.999999999Z"}))
            .unwrap();

        match context.dao.insert(&context.store, &model).await {
            Err(DbError::InvalidArgument(e)) => assert!(e.contains("out of range")),
            e => panic!("{:?}", e),
        }
        assert_eq!(0, context.store.call_count("set").await);
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let context = TestContext::setup();
        let model = GenericModel::new().with_field("name", "flarb");

        let inserted = context.dao.insert(&context.store, &model).await.unwrap();
        let id = inserted.base().id().unwrap();
        assert_eq!(Some(0), inserted.base().version());

        let keys = context.store.keys_matching("*").await.unwrap();
        assert_eq!(vec![format!("MyDomainName:{}", id)], keys);

        let raw = context.store.get(&keys[0]).await.unwrap().unwrap();
        let stored = context.dao.parse_model(raw).unwrap();
        assert_eq!(inserted, stored);

        context.clock.advance(Duration::from_millis(1500));
        let updated = context.dao.update(&context.store, &stored).await.unwrap();
        assert_eq!(Some(1), updated.base().version());
        assert_eq!(inserted.base().date_created(), updated.base().date_created());
        assert!(updated.base().last_updated() > inserted.base().last_updated());
        assert_eq!(Some(updated), context.dao.find_by_id(&context.store, id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_increments_given_version() {
        let context = TestContext::setup();
        let mut model = GenericModel::new();
        model.base_mut().set_version(25);

        let updated = context.dao.update(&context.store, &model).await.unwrap();
        assert_eq!(Some(26), updated.base().version());
        assert_eq!(Some(25), model.base().version());
    }

    #[tokio::test]
    async fn test_update_and_expire() {
        let context = TestContext::setup();
        let model = GenericModel::new().with_field("token", "abc");

        let saved = context.dao.update_and_expire(&context.store, &model, 30).await.unwrap();
        assert_eq!(Some(1), saved.base().version());
        let id = saved.base().id().unwrap();
        assert!(context.dao.find_by_id(&context.store, id).await.unwrap().is_some());

        context.clock.advance(Duration::from_secs(30));
        assert!(context.dao.find_by_id(&context.store, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_expire_zero_ttl() {
        let context = TestContext::setup();
        match context.dao.update_and_expire(&context.store, &GenericModel::new(), 0).await {
            Err(DbError::InvalidArgument(_)) => (),
            e => panic!("{:?}", e),
        }
        assert_eq!(0, context.store.call_count("set_with_expiry").await);
        assert!(context.store.keys_matching("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_store_error() {
        let context = TestContext::setup();
        let mut model = GenericModel::new();
        model.base_mut().set_id("broken".to_owned());
        context.store.fail_on_key("MyDomainName:broken").await;

        match context.dao.insert(&context.store, &model).await {
            Err(DbError::BackendError(_)) => (),
            e => panic!("{:?}", e),
        }
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let context = TestContext::setup();
        assert_eq!(None, context.dao.find_by_id(&context.store, "never-written").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_id_corrupt() {
        let context = TestContext::setup();
        context.store.set("MyDomainName:bad", "{not json".to_owned()).await.unwrap();
        match context.dao.find_by_id(&context.store, "bad").await {
            Err(DbError::DataIntegrityError(e)) => assert!(e.contains("MyDomainName")),
            e => panic!("{:?}", e),
        }
    }

    #[tokio::test]
    async fn test_query_returns_whole_domain() {
        let context = TestContext::setup();
        let mut exp = context.insert_many("flarb", 75).await;
        context.store.set("OtherDomain:1", "{}".to_owned()).await.unwrap();

        let mut models = context.dao.query(&context.store).await.unwrap();
        exp.sort_by(|a, b| a.base().id().cmp(&b.base().id()));
        models.sort_by(|a, b| a.base().id().cmp(&b.base().id()));
        assert_eq!(exp, models);
        assert_eq!(75, context.store.call_count("get").await);
    }

    #[tokio::test]
    async fn test_query_empty_domain() {
        let context = TestContext::setup();
        assert!(context.dao.query(&context.store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_fails_fast() {
        let context = TestContext::setup();
        context.insert_many("x", 5).await;
        let keys = context.store.keys_matching("MyDomainName:*").await.unwrap();
        assert_eq!(5, keys.len());
        context.store.fail_on_key(keys[2].clone()).await;

        match context.dao.query(&context.store).await {
            Err(DbError::BackendError(e)) => assert!(e.contains("Injected failure")),
            e => panic!("{:?}", e),
        }
        assert_eq!(3, context.store.call_count("get").await);
    }

    #[tokio::test]
    async fn test_query_too_large() {
        let context = TestContext::setup_with_opts(DaoOptions {
            max_scan_rows: Some(2),
            ..Default::default()
        });
        context.insert_many("x", 3).await;

        assert_eq!(DbError::QueryTooLarge(3, 2), context.dao.query(&context.store).await.unwrap_err());
        assert_eq!(0, context.store.call_count("get").await);
    }

    #[tokio::test]
    async fn test_query_by_index_set() {
        let context = TestContext::setup();
        let models = context.insert_many("fset me", 3).await;
        for model in &models[0..2] {
            let key = context.dao.domain_key(model.base().id().unwrap()).unwrap();
            context.store.add_to_set("my.set.name", &key).await.unwrap();
        }
        context.store.add_to_set("my.set.name", "MyDomainName:deleted").await.unwrap();

        let mut found = context.dao.query_by_index_set(&context.store, "my.set.name").await.unwrap();
        found.sort_by(|a, b| a.base().id().cmp(&b.base().id()));
        let mut exp = models[0..2].to_vec();
        exp.sort_by(|a, b| a.base().id().cmp(&b.base().id()));
        assert_eq!(exp, found);
        assert_eq!(1, context.store.call_count("multi_get").await);
    }

    #[tokio::test]
    async fn test_query_by_index_set_empty() {
        let context = TestContext::setup();
        context.insert_many("x", 2).await;

        assert!(context.dao.query_by_index_set(&context.store, "empty").await.unwrap().is_empty());
        assert_eq!(0, context.store.call_count("multi_get").await);
    }

    #[tokio::test]
    async fn test_store_timeout() {
        let context = TestContext::setup_with_opts(DaoOptions {
            store_timeout: Duration::from_millis(10),
            ..Default::default()
        });
        context.store.set_delay(Duration::from_millis(500)).await;

        match context.dao.find_by_id(&context.store, "slow").await {
            Err(DbError::Timeout(e)) => assert!(e.contains("get in domain MyDomainName")),
            e => panic!("{:?}", e),
        }
    }

    #[test]
    fn test_parse_model_from_text_and_json() {
        let context = TestContext::setup();
        let text = r#"{"id":"1","dateCreated":"2023-01-01T00:00:00.123Z","version":3,"a":true}"#;

        let from_text = context.dao.parse_model(text).unwrap();
        let from_json = context.dao.parse_model(serde_json::from_str::<Value>(text).unwrap()).unwrap();
        assert_eq!(from_text, from_json);
        assert_eq!(Some(datetime!(2023-01-01 00:00:00.123 UTC)), from_text.base().date_created());
        assert_eq!(Some(&json!(true)), from_text.field("a"));
    }

    #[test]
    fn test_parse_model_round_trip_timestamps() {
        let context = TestContext::setup();
        context.clock.advance(Duration::from_millis(789));
        let model = context.dao.prepare_for_write(&GenericModel::new()).unwrap();

        let parsed = context.dao.parse_model(serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(model.base().date_created(), parsed.base().date_created());
        assert_eq!(model.base().last_updated(), parsed.base().last_updated());
        assert_eq!(Some(datetime!(2023-06-01 08:00:00.789 UTC)), parsed.base().last_updated());
    }

    #[test]
    fn test_parse_model_errors() {
        let context = TestContext::setup();
        for raw in ["", "[1, 2]", r#"{"dateCreated": "not a date"}"#, r#"{"version": -3}"#] {
            match context.dao.parse_model(raw) {
                Err(DbError::DataIntegrityError(_)) => (),
                e => panic!("{} parsed as {:?}", raw, e),
            }
        }
    }

    #[test]
    fn test_parse_model_list_skips_missing() {
        let context = TestContext::setup();
        let raws = vec![Some(r#"{"id":"a"}"#), None, Some(r#"{"id":"b"}"#)];
        let models = context.dao.parse_model_list(raws).unwrap();
        assert_eq!(
            vec![Some("a"), Some("b")],
            models.iter().map(|m| m.base().id()).collect::<Vec<Option<&str>>>()
        );
    }
}

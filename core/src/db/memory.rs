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

//! Key/value store implementation backed by in-process memory.

use crate::clocks::Clock;
use crate::db::{DbError, DbResult, KvStore};
use async_trait::async_trait;
use futures::lock::Mutex;
use log::debug;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Contents of a single key.
enum Value {
    /// A plain string value with its optional expiration time.
    Str(String, Option<OffsetDateTime>),

    /// A set of strings.
    Set(BTreeSet<String>),
}

/// Mutable state of the store.
#[derive(Default)]
struct State {
    /// All keys and their values.
    data: HashMap<String, Value>,

    /// Keys whose access fails with a backend error.
    failing_keys: HashSet<String>,

    /// Number of calls received by each operation.
    calls: HashMap<&'static str, usize>,

    /// Artificial delay applied to every operation.
    delay: Option<Duration>,
}

impl State {
    /// Records a call to `op` touching `keys` and fails if any of them is marked as failing.
    fn account<'a, I>(&mut self, op: &'static str, keys: I) -> DbResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        *self.calls.entry(op).or_insert(0) += 1;
        for key in keys {
            if self.failing_keys.contains(key) {
                return Err(DbError::BackendError(format!("Injected failure in {} for {}", op, key)));
            }
        }
        Ok(())
    }

    /// Returns the string value of `key` if it exists and has not expired.
    fn get_str(&mut self, key: &str, now: OffsetDateTime) -> DbResult<Option<String>> {
        let expired = matches!(
            self.data.get(key), Some(Value::Str(_, Some(expiry))) if *expiry <= now);
        if expired {
            debug!("Purging expired key {}", key);
            self.data.remove(key);
            return Ok(None);
        }

        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Str(value, _)) => Ok(Some(value.clone())),
            Some(Value::Set(_)) => Err(wrong_type(key)),
        }
    }

    /// Drops all expired keys.
    fn purge_expired(&mut self, now: OffsetDateTime) {
        self.data.retain(|_, value| match value {
            Value::Str(_, Some(expiry)) => *expiry > now,
            _ => true,
        });
    }
}

/// Builds the error returned when operating on a key that holds the wrong kind of value.
fn wrong_type(key: &str) -> DbError {
    DbError::BackendError(format!(
        "WRONGTYPE Operation against key {} holding the wrong kind of value",
        key
    ))
}

/// Returns true if `key` matches the glob `pattern`, where `*` matches any sequence of characters
/// and `?` matches exactly one.
pub(crate) fn glob_matches(pattern: &str, key: &str) -> bool {
    let pattern = pattern.chars().collect::<Vec<char>>();
    let key = key.chars().collect::<Vec<char>>();

    let (mut p, mut k) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
        } else if let Some((star_p, star_k)) = backtrack {
            p = star_p + 1;
            k = star_k + 1;
            backtrack = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Key/value store that keeps all data in memory.
///
/// Expiration of keys is driven by the injected clock so that tests can control it.
#[derive(Clone)]
pub struct MemoryStore {
    /// Clock used to compute and check expiration times.
    clock: Arc<dyn Clock + Send + Sync>,

    /// Contents of the store.
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Creates a new empty store that uses `clock` to handle expirations.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { clock, state: Arc::from(Mutex::from(State::default())) }
    }

    /// Locks the state and records a call to `op` on `keys`, honoring any configured delay.
    async fn enter<'a, I>(
        &self,
        op: &'static str,
        keys: I,
    ) -> DbResult<futures::lock::MutexGuard<'_, State>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.account(op, keys)?;
        Ok(state)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let mut state = self.enter("get", [key]).await?;
        state.get_str(key, self.clock.now_utc())
    }

    async fn set(&self, key: &str, value: String) -> DbResult<()> {
        let mut state = self.enter("set", [key]).await?;
        state.data.insert(key.to_owned(), Value::Str(value, None));
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: String, ttl_seconds: u64) -> DbResult<()> {
        if ttl_seconds == 0 {
            return Err(DbError::BackendError("ERR invalid expire time in set".to_owned()));
        }
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| DbError::BackendError(format!("Expiry {} is too large", ttl_seconds)))?;
        let expiry = self
            .clock
            .now_utc()
            .checked_add(time::Duration::seconds(ttl))
            .ok_or_else(|| DbError::BackendError(format!("Expiry {} is too large", ttl_seconds)))?;

        let mut state = self.enter("set_with_expiry", [key]).await?;
        state.data.insert(key.to_owned(), Value::Str(value, Some(expiry)));
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> DbResult<Vec<String>> {
        let mut state = self.enter("keys_matching", std::iter::empty::<&str>()).await?;
        state.purge_expired(self.clock.now_utc());
        Ok(state.data.keys().filter(|k| glob_matches(pattern, k)).cloned().collect())
    }

    async fn set_members(&self, name: &str) -> DbResult<Vec<String>> {
        let state = self.enter("set_members", [name]).await?;
        match state.data.get(name) {
            None => Ok(vec![]),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Value::Str(..)) => Err(wrong_type(name)),
        }
    }

    async fn multi_get(&self, keys: &[String]) -> DbResult<Vec<Option<String>>> {
        let mut state = self.enter("multi_get", keys.iter().map(String::as_str)).await?;
        let now = self.clock.now_utc();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            // Like MGET, keys holding a non-string value read as missing.
            match state.get_str(key, now) {
                Ok(value) => values.push(value),
                Err(_) => values.push(None),
            }
        }
        Ok(values)
    }

    async fn add_to_set(&self, name: &str, member: &str) -> DbResult<()> {
        let mut state = self.enter("add_to_set", [name]).await?;
        match state.data.entry(name.to_owned()).or_insert_with(|| Value::Set(BTreeSet::new())) {
            Value::Set(members) => {
                members.insert(member.to_owned());
                Ok(())
            }
            Value::Str(..) => Err(wrong_type(name)),
        }
    }

    async fn remove_from_set(&self, name: &str, member: &str) -> DbResult<()> {
        let mut state = self.enter("remove_from_set", [name]).await?;
        let now_empty = match state.data.get_mut(name) {
            None => return Ok(()),
            Some(Value::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Value::Str(..)) => return Err(wrong_type(name)),
        };
        if now_empty {
            state.data.remove(name);
        }
        Ok(())
    }
}

/// Test utilities for the in-memory store.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use crate::clocks::testutils::SettableClock;

    impl MemoryStore {
        /// Makes every operation that touches `key` fail with a backend error.
        pub async fn fail_on_key<K: Into<String>>(&self, key: K) {
            self.state.lock().await.failing_keys.insert(key.into());
        }

        /// Delays every subsequent operation by `delay`.
        pub async fn set_delay(&self, delay: Duration) {
            self.state.lock().await.delay = Some(delay);
        }

        /// Returns the number of calls received by the operation `op` (e.g. `multi_get`).
        pub async fn call_count(&self, op: &str) -> usize {
            self.state.lock().await.calls.get(op).copied().unwrap_or(0)
        }
    }

    /// Creates a new empty store driven by a settable clock, returning both.
    pub fn setup() -> (MemoryStore, Arc<SettableClock>) {
        let _can_fail = env_logger::builder().is_test(true).try_init();
        let start = OffsetDateTime::from_unix_timestamp(1709294400)
            .expect("Hardcoded test timestamp must be valid");
        let clock = Arc::from(SettableClock::new(start));
        (MemoryStore::new(clock.clone()), clock)
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;
    use crate::db::tests::generate_kv_store_tests;

    generate_kv_store_tests!({
        let (store, _clock) = setup();
        Arc::new(store) as Arc<dyn KvStore>
    });

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("*", ""));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("user:*", "user:"));
        assert!(glob_matches("user:*", "user:abc"));
        assert!(!glob_matches("user:*", "users:abc"));
        assert!(glob_matches("*:1", "order:1"));
        assert!(glob_matches("a*b*c", "a-b-b-c"));
        assert!(!glob_matches("a*b*c", "a-b-b-d"));
        assert!(glob_matches("k?y", "key"));
        assert!(!glob_matches("k?y", "ky"));
        assert!(!glob_matches("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let (store, clock) = setup();
        store.set_with_expiry("session:1", "data".to_owned(), 10).await.unwrap();
        store.set("user:1", "data".to_owned()).await.unwrap();

        clock.advance(Duration::from_secs(9));
        assert_eq!(Some("data".to_owned()), store.get("session:1").await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert_eq!(None, store.get("session:1").await.unwrap());
        assert_eq!(vec!["user:1".to_owned()], store.keys_matching("*").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_clears_expiry() {
        let (store, clock) = setup();
        store.set_with_expiry("k", "a".to_owned(), 1).await.unwrap();
        store.set("k", "b".to_owned()).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(Some("b".to_owned()), store.get("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_with_expiry_out_of_range() {
        let (store, _clock) = setup();
        for ttl in [i64::MAX as u64, u64::MAX] {
            match store.set_with_expiry("k", "a".to_owned(), ttl).await {
                Err(DbError::BackendError(e)) => assert!(e.contains("too large")),
                e => panic!("{:?}", e),
            }
        }
        assert_eq!(None, store.get("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_with_expiry_zero_rejected() {
        let (store, _clock) = setup();
        store.set_with_expiry("k", "a".to_owned(), 0).await.unwrap_err();
        assert_eq!(None, store.get("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (store, _clock) = setup();
        store.add_to_set("idx", "a").await.unwrap();
        store.set("str", "a".to_owned()).await.unwrap();

        match store.get("idx").await {
            Err(DbError::BackendError(e)) => assert!(e.starts_with("WRONGTYPE")),
            e => panic!("{:?}", e),
        }
        store.add_to_set("str", "a").await.unwrap_err();
        assert_eq!(
            vec![None, Some("a".to_owned())],
            store.multi_get(&["idx".to_owned(), "str".to_owned()]).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_fault_injection_and_counting() {
        let (store, _clock) = setup();
        store.set("good", "1".to_owned()).await.unwrap();
        store.fail_on_key("bad").await;

        assert_eq!(Some("1".to_owned()), store.get("good").await.unwrap());
        match store.get("bad").await {
            Err(DbError::BackendError(e)) => assert!(e.contains("Injected failure in get for bad")),
            e => panic!("{:?}", e),
        }
        store.multi_get(&["good".to_owned(), "bad".to_owned()]).await.unwrap_err();

        assert_eq!(1, store.call_count("set").await);
        assert_eq!(2, store.call_count("get").await);
        assert_eq!(1, store.call_count("multi_get").await);
        assert_eq!(0, store.call_count("set_members").await);
    }
}

//! In-process store with Redis-compatible semantics.
//!
//! Expiry is lazy: an expired key is dropped the next time anything touches it.
//! Time comes from `tokio::time`, so tests can drive TTLs with paused time.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{StateStore, StoreError, StoreOp};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry for a key, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn live_or_insert(&mut self, key: &str, empty: Value) -> &mut Entry {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.expired(now)) {
            self.entries.remove(key);
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(empty))
    }

    fn apply(&mut self, op: StoreOp, replies: &mut Vec<i64>) -> Result<(), StoreError> {
        match op {
            StoreOp::Set { key, value, ttl } => {
                let entry = Entry {
                    value: Value::Str(value),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                };
                self.entries.insert(key, entry);
            }
            StoreOp::IncrBy { key, delta } => {
                let entry = self.live_or_insert(&key, Value::Str("0".to_string()));
                let Value::Str(current) = &mut entry.value else {
                    return Err(StoreError::WrongType(key));
                };
                let parsed: i64 = current.parse().map_err(|_| StoreError::NotAnInteger {
                    key: key.clone(),
                    value: current.clone(),
                })?;
                let updated = parsed + delta;
                *current = updated.to_string();
                replies.push(updated);
            }
            StoreOp::Expire { key, ttl } => {
                if let Some(entry) = self.live(&key) {
                    entry.expires_at = Some(Instant::now() + ttl);
                }
            }
            StoreOp::SAdd { key, members } => {
                if members.is_empty() {
                    return Ok(());
                }
                let entry = self.live_or_insert(&key, Value::Set(BTreeSet::new()));
                let Value::Set(set) = &mut entry.value else {
                    return Err(StoreError::WrongType(key));
                };
                set.extend(members);
            }
            StoreOp::LPush { key, values } => {
                if values.is_empty() {
                    return Ok(());
                }
                let entry = self.live_or_insert(&key, Value::List(VecDeque::new()));
                let Value::List(list) = &mut entry.value else {
                    return Err(StoreError::WrongType(key));
                };
                for value in values {
                    list.push_front(value);
                }
            }
            StoreOp::LTrim { key, start, stop } => {
                if let Some(entry) = self.live(&key) {
                    let Value::List(list) = &mut entry.value else {
                        return Err(StoreError::WrongType(key));
                    };
                    let kept = match list_range(list.len(), start, stop) {
                        Some((from, to)) => list.drain(from..=to).collect(),
                        None => VecDeque::new(),
                    };
                    *list = kept;
                    if list.is_empty() {
                        self.entries.remove(&key);
                    }
                }
            }
            StoreOp::Del { keys } => {
                for key in keys {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn pop_back(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(entry) = self.live(key) else {
            return Ok(None);
        };
        let Value::List(list) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let popped = list.pop_back();
        if list.is_empty() {
            self.entries.remove(key);
        }
        Ok(popped)
    }
}

/// Resolve Redis-style inclusive indices against a list length
fn list_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let resolve = |i: isize| if i < 0 { len + i } else { i };
    let start = resolve(start).max(0);
    let stop = resolve(stop).min(len - 1);
    if len == 0 || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Store kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let mut keyspace = self.keyspace.lock().await;
        let now = Instant::now();
        keyspace.entries.retain(|_, entry| !entry.expired(now));
        keyspace.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keyspace.lock().await.live(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(set.len() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(match list_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn atomic(&self, ops: Vec<StoreOp>) -> Result<Vec<i64>, StoreError> {
        let pushes = ops.iter().any(|op| matches!(op, StoreOp::LPush { .. }));
        let mut replies = Vec::new();
        {
            let mut keyspace = self.keyspace.lock().await;
            for op in ops {
                keyspace.apply(op, &mut replies)?;
            }
        }
        if pushes {
            self.pushed.notify_waiters();
        }
        Ok(replies)
    }

    async fn blocking_pop(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.keyspace.lock().await.pop_back(list)? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut keyspace = self.keyspace.lock().await;
        match keyspace.live(key) {
            None => return Ok(None),
            Some(entry) if !matches!(entry.value, Value::Str(_)) => {
                return Err(StoreError::WrongType(key.to_string()));
            }
            Some(_) => {}
        }
        match keyspace.entries.remove(key).map(|e| e.value) {
            Some(Value::Str(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_incr_creates_and_returns_new_values() {
        let store = MemoryStore::new();
        let replies = store
            .atomic(vec![
                StoreOp::incr_by("a", 5),
                StoreOp::set("b", "x", None),
                StoreOp::incr_by("a", -2),
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![5, 3]);
        assert_eq!(store.get_i64("a").await.unwrap(), Some(3));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_incr_on_text_fails() {
        let store = MemoryStore::new();
        store.atomic(vec![StoreOp::set("a", "abc", None)]).await.unwrap();
        let err = store.atomic(vec![StoreOp::incr_by("a", 1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { .. }));
        assert!(matches!(
            store.get_i64("a").await,
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_refresh() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store
            .atomic(vec![
                StoreOp::set("short", 1, Some(ttl)),
                StoreOp::set("refreshed", 1, Some(ttl)),
                StoreOp::set("forever", 1, None),
            ])
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store.atomic(vec![StoreOp::expire("refreshed", ttl)]).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!store.exists("short").await.unwrap());
        assert!(store.exists("refreshed").await.unwrap());
        assert!(store.exists("forever").await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_sets_deduplicate() {
        let store = MemoryStore::new();
        let add = |members: &[&str]| StoreOp::SAdd {
            key: "s".to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        };
        store.atomic(vec![add(&["b", "a"]), add(&["a", "c"])]).await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.scard("s").await.unwrap(), 3);
        assert_eq!(store.scard("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_push_trim_range() {
        let store = MemoryStore::new();
        for i in 0..12 {
            store
                .atomic(vec![
                    StoreOp::LPush {
                        key: "l".to_string(),
                        values: vec![i.to_string()],
                    },
                    StoreOp::LTrim {
                        key: "l".to_string(),
                        start: 0,
                        stop: 9,
                    },
                ])
                .await
                .unwrap();
        }
        let all = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all.first().map(String::as_str), Some("11"));
        assert_eq!(all.last().map(String::as_str), Some("2"));
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["3", "2"]);
        assert!(store.lrange("l", 5, 2).await.unwrap().is_empty());
    }

    #[test]
    fn test_list_range_resolution() {
        assert_eq!(list_range(10, 0, -1), Some((0, 9)));
        assert_eq!(list_range(10, 0, 100), Some((0, 9)));
        assert_eq!(list_range(10, -3, -1), Some((7, 9)));
        assert_eq!(list_range(0, 0, -1), None);
        assert_eq!(list_range(3, 2, 1), None);
    }

    #[tokio::test]
    async fn test_take_removes() {
        let store = MemoryStore::new();
        store.atomic(vec![StoreOp::set("job", "payload", None)]).await.unwrap();
        assert_eq!(store.take("job").await.unwrap().as_deref(), Some("payload"));
        assert_eq!(store.take("job").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocking_pop_is_fifo() {
        let store = MemoryStore::new();
        for v in ["first", "second"] {
            store
                .atomic(vec![StoreOp::LPush {
                    key: "q".to_string(),
                    values: vec![v.to_string()],
                }])
                .await
                .unwrap();
        }
        let timeout = Duration::from_millis(10);
        assert_eq!(store.blocking_pop("q", timeout).await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.blocking_pop("q", timeout).await.unwrap().as_deref(), Some("second"));
        assert!(!store.exists("q").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_times_out() {
        let store = MemoryStore::new();
        let popped = store.blocking_pop("q", Duration::from_secs(10)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blocking_pop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .atomic(vec![StoreOp::LPush {
                key: "q".to_string(),
                values: vec!["job".to_string()],
            }])
            .await
            .unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("job"));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.atomic(vec![StoreOp::set("k", "v", None)]).await.unwrap();
        assert!(matches!(store.smembers("k").await, Err(StoreError::WrongType(_))));
        assert!(matches!(
            store.blocking_pop("k", Duration::from_millis(1)).await,
            Err(StoreError::WrongType(_))
        ));
    }
}

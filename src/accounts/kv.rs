//! Key/value backend contract for the account store.
//!
//! The store needs exactly four primitives from its backend: an atomic
//! create-if-absent, an unconditional put, a point read, and a key lister
//! that can be released before it is exhausted. [`InMemoryKeyValue`] is the
//! bundled implementation, backed by a `DashMap`.
//!
//! # Atomicity
//!
//! [`KeyValue::create`] must fail with [`KvError::KeyExists`] when the key is
//! already present, even under concurrent callers. The in-memory backend
//! gets this from the `DashMap` entry API, which holds the shard lock across
//! the check and the insert.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

/// Default cap on concurrently open key listers.
pub const DEFAULT_MAX_LISTERS: usize = 64;

/// Backend failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// `create` found the key already present.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// The key violates the backend's key grammar.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// All lister slots are in use.
    #[error("too many open key listers (limit {0})")]
    ListerLimit(usize),

    /// The backend could not be reached or failed the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A stored value with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Full key.
    pub key: String,
    /// Raw value.
    pub value: Bytes,
    /// Monotonic revision assigned by the backend.
    pub revision: u64,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

/// Trait abstracting the key/value backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// concurrent login and callout tasks.
#[async_trait::async_trait]
pub trait KeyValue: Send + Sync + 'static {
    /// Store `value` under `key` only if the key is absent. Returns the revision.
    async fn create(&self, key: &str, value: Bytes) -> Result<u64, KvError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes) -> Result<u64, KvError>;

    /// Read the current value of `key`.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    /// Open a lister over all keys present at call time.
    async fn list_keys(&self) -> Result<Box<dyn KeyLister>, KvError>;
}

/// Forward-only cursor over backend keys.
///
/// A lister holds backend resources until it is exhausted, stopped or
/// dropped. Consumers that break out early must call [`KeyLister::stop`]
/// (dropping has the same effect).
#[async_trait::async_trait]
pub trait KeyLister: Send {
    /// Next key, or `None` once the lister is exhausted or stopped.
    async fn next_key(&mut self) -> Option<Result<String, KvError>>;

    /// Release the lister. Further calls to `next_key` return `None`.
    fn stop(&mut self);
}

/// Check a key against the hierarchical key grammar: dot-separated,
/// non-empty segments, no whitespace or wildcard characters.
pub fn validate_key(key: &str) -> Result<(), KvError> {
    let valid = !key.is_empty()
        && key.split('.').all(|segment| {
            !segment.is_empty()
                && !segment
                    .chars()
                    .any(|c| c.is_whitespace() || c.is_control() || c == '*' || c == '>')
        });
    if valid {
        Ok(())
    } else {
        Err(KvError::InvalidKey(key.to_string()))
    }
}

/// In-memory backend backed by a `DashMap`.
pub struct InMemoryKeyValue {
    entries: DashMap<String, KvEntry>,
    revision: AtomicU64,
    open_listers: Arc<AtomicUsize>,
    max_listers: usize,
}

impl InMemoryKeyValue {
    /// Create an empty backend with the default lister cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_listers(DEFAULT_MAX_LISTERS)
    }

    /// Create an empty backend allowing at most `max_listers` open listers.
    #[must_use]
    pub fn with_max_listers(max_listers: usize) -> Self {
        Self {
            entries: DashMap::new(),
            revision: AtomicU64::new(0),
            open_listers: Arc::new(AtomicUsize::new(0)),
            max_listers,
        }
    }

    /// Number of listers currently holding a slot.
    #[must_use]
    pub fn open_listers(&self) -> usize {
        self.open_listers.load(Ordering::Acquire)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: &str, value: Bytes) -> KvEntry {
        KvEntry {
            key: key.to_string(),
            value,
            revision: self.revision.fetch_add(1, Ordering::AcqRel) + 1,
            updated_at: Utc::now(),
        }
    }
}

impl Default for InMemoryKeyValue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeyValue for InMemoryKeyValue {
    async fn create(&self, key: &str, value: Bytes) -> Result<u64, KvError> {
        validate_key(key)?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Err(KvError::KeyExists(key.to_string())),
            Entry::Vacant(slot) => {
                let entry = self.entry(key, value);
                let revision = entry.revision;
                slot.insert(entry);
                trace!(key = %key, revision, "Created key");
                Ok(revision)
            }
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, KvError> {
        validate_key(key)?;
        let entry = self.entry(key, value);
        let revision = entry.revision;
        self.entries.insert(key.to_string(), entry);
        trace!(key = %key, revision, "Put key");
        Ok(revision)
    }

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        validate_key(key)?;
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn list_keys(&self) -> Result<Box<dyn KeyLister>, KvError> {
        let slot = ListerSlot::acquire(&self.open_listers, self.max_listers)?;

        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        debug!(keys = keys.len(), "Opened key lister");

        Ok(Box::new(InMemoryKeyLister {
            keys: keys.into(),
            slot: Some(slot),
        }))
    }
}

/// Counts one open lister; released on drop.
struct ListerSlot {
    open: Arc<AtomicUsize>,
}

impl ListerSlot {
    fn acquire(open: &Arc<AtomicUsize>, max: usize) -> Result<Self, KvError> {
        open.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| KvError::ListerLimit(max))?;
        Ok(Self {
            open: Arc::clone(open),
        })
    }
}

impl Drop for ListerSlot {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

struct InMemoryKeyLister {
    keys: VecDeque<String>,
    slot: Option<ListerSlot>,
}

#[async_trait::async_trait]
impl KeyLister for InMemoryKeyLister {
    async fn next_key(&mut self) -> Option<Result<String, KvError>> {
        self.slot.as_ref()?;
        match self.keys.pop_front() {
            Some(key) => Some(Ok(key)),
            None => {
                // Exhausted: give the slot back without waiting for drop.
                self.stop();
                None
            }
        }
    }

    fn stop(&mut self) {
        if self.slot.take().is_some() {
            self.keys.clear();
            trace!("Key lister released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_inserts_absent_key() {
        // GIVEN: an empty backend
        let kv = InMemoryKeyValue::new();

        // WHEN: creating a key
        let revision = kv.create("a.b.c", Bytes::from_static(b"1")).await.unwrap();

        // THEN: it is readable with the returned revision
        let entry = kv.get("a.b.c").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"1"));
        assert_eq!(entry.revision, revision);
    }

    #[tokio::test]
    async fn create_refuses_existing_key() {
        // GIVEN: a stored key
        let kv = InMemoryKeyValue::new();
        kv.create("a.b", Bytes::from_static(b"first")).await.unwrap();

        // WHEN: creating it again
        let err = kv.create("a.b", Bytes::from_static(b"second")).await.unwrap_err();

        // THEN: the first value is kept
        assert_eq!(err, KvError::KeyExists("a.b".into()));
        let entry = kv.get("a.b").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn concurrent_creates_have_one_winner() {
        // GIVEN: a shared backend
        let kv = Arc::new(InMemoryKeyValue::new());

        // WHEN: 32 tasks race to create the same key
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let kv = Arc::clone(&kv);
            handles.push(tokio::spawn(async move {
                kv.create("race.key", Bytes::from(vec![i])).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        // THEN: exactly one succeeded
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn put_overwrites_and_bumps_revision() {
        let kv = InMemoryKeyValue::new();
        let first = kv.put("a.b", Bytes::from_static(b"1")).await.unwrap();
        let second = kv.put("a.b", Bytes::from_static(b"2")).await.unwrap();

        assert!(second > first);
        let entry = kv.get("a.b").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let kv = InMemoryKeyValue::new();
        assert!(kv.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let kv = InMemoryKeyValue::new();
        for key in ["", "a..b", ".a", "a.", "a.*", "a.>", "a b"] {
            assert!(
                matches!(
                    kv.put(key, Bytes::new()).await,
                    Err(KvError::InvalidKey(_))
                ),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn lister_yields_sorted_snapshot() {
        // GIVEN: three keys
        let kv = InMemoryKeyValue::new();
        for key in ["c", "a", "b"] {
            kv.put(key, Bytes::new()).await.unwrap();
        }

        // WHEN: listing
        let mut lister = kv.list_keys().await.unwrap();
        let mut seen = Vec::new();
        while let Some(key) = lister.next_key().await {
            seen.push(key.unwrap());
        }

        // THEN: all keys, sorted; slot released on exhaustion
        assert_eq!(seen, ["a", "b", "c"]);
        assert_eq!(kv.open_listers(), 0);
    }

    #[tokio::test]
    async fn stopped_lister_releases_slot() {
        // GIVEN: a backend with a single lister slot
        let kv = InMemoryKeyValue::with_max_listers(1);
        kv.put("a", Bytes::new()).await.unwrap();
        kv.put("b", Bytes::new()).await.unwrap();

        // WHEN: one lister is open, a second is refused
        let mut lister = kv.list_keys().await.unwrap();
        assert!(lister.next_key().await.is_some());
        assert!(matches!(kv.list_keys().await, Err(KvError::ListerLimit(1))));

        // THEN: stopping frees the slot and ends the lister
        lister.stop();
        assert!(lister.next_key().await.is_none());
        assert_eq!(kv.open_listers(), 0);
        assert!(kv.list_keys().await.is_ok());
    }

    #[tokio::test]
    async fn dropped_lister_releases_slot() {
        let kv = InMemoryKeyValue::with_max_listers(1);
        kv.put("a", Bytes::new()).await.unwrap();
        {
            let _lister = kv.list_keys().await.unwrap();
            assert_eq!(kv.open_listers(), 1);
        }
        assert_eq!(kv.open_listers(), 0);
    }
}

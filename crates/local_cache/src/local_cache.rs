use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use cache::{Cache, CacheEntry, CacheKey};
use chrono::{NaiveDateTime, Utc};
use heed::{
    Database, Env, EnvOpenOptions, MdbError,
    types::{Bytes, SerdeJson, Str},
};
use serde::de::IgnoredAny;
use serde_json::Value;

pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024;

const PAGE_SIZE: usize = 4096;

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct LocalCache {
    env: Env,
    storage: Database<Str, SerdeJson<CacheEntry<Value>>>,
    max_age: chrono::Duration,
    // Entries are kept below this many bytes, leaving the rest of the map
    // for copy-on-write pages and the free list.
    capacity: u64,
    clock: Clock,
}

impl LocalCache {
    pub fn new<P: AsRef<Path>>(path: P, max_age: Option<Duration>) -> Result<Self> {
        Self::with_map_size(path, max_age, DEFAULT_MAP_SIZE)
    }

    /// Opens the store with an LMDB map of `map_size` bytes, rounded up to
    /// whole pages.
    pub fn with_map_size<P: AsRef<Path>>(
        path: P,
        max_age: Option<Duration>,
        map_size: usize,
    ) -> Result<Self> {
        fs::create_dir_all(path.as_ref())?;

        let map_size = map_size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(40)
                .open(path.as_ref())?
        };

        let mut wtxn = env.write_txn()?;
        let storage = env.create_database(&mut wtxn, Some("responses"))?;
        wtxn.commit()?;

        let max_age = max_age.unwrap_or(Duration::from_secs(60 * 60));

        Ok(LocalCache {
            env,
            storage,
            max_age: chrono::Duration::from_std(max_age)
                .map_err(|_| anyhow!("cache max age is out of range"))?,
            capacity: map_size as u64 / 2,
            clock: Arc::new(|| Utc::now().naive_utc()),
        })
    }

    /// Replaces the wall clock used to timestamp and age entries.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn is_expired(&self, entry: &CacheEntry<Value>, now: NaiveDateTime) -> bool {
        now - entry.created_at > self.max_age
    }

    fn used_bytes(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        let stat = self.storage.stat(&rtxn)?;
        let pages = stat.leaf_pages + stat.branch_pages + stat.overflow_pages;
        Ok(pages as u64 * stat.page_size as u64)
    }

    /// Frees space for an incoming entry of `incoming` bytes: expired entries
    /// go first, then the oldest live ones.
    fn make_room(&self, incoming: u64) -> Result<()> {
        if self.used_bytes()? + incoming <= self.capacity {
            return Ok(());
        }

        self.purge_expired()?;
        let used = self.used_bytes()?;
        if used + incoming <= self.capacity {
            return Ok(());
        }

        self.evict_oldest(used + incoming - self.capacity / 2)
    }

    fn evict_oldest(&self, bytes: u64) -> Result<()> {
        let mut candidates = {
            let rtxn = self.env.read_txn()?;
            let raw = self.storage.remap_data_type::<Bytes>();
            let mut candidates = Vec::new();

            for item in raw.iter(&rtxn)? {
                let (key, data) = item?;
                let created_at = serde_json::from_slice::<CacheEntry<IgnoredAny>>(data)
                    .map(|entry| entry.created_at)
                    .unwrap_or(NaiveDateTime::MIN);
                candidates.push((created_at, key.to_owned(), (key.len() + data.len()) as u64));
            }

            candidates
        };
        candidates.sort();

        let mut wtxn = self.env.write_txn()?;
        let mut freed = 0;
        let mut evicted = 0;
        for (_, key, size) in candidates {
            if freed >= bytes {
                break;
            }
            if self.storage.delete(&mut wtxn, &key)? {
                freed += size;
                evicted += 1;
            }
        }
        wtxn.commit()?;

        log::warn!("Cache full, evicted {} oldest entries", evicted);
        Ok(())
    }

    fn put(&self, key: &str, entry: &CacheEntry<Value>) -> heed::Result<()> {
        let mut write_txn = self.env.write_txn()?;
        self.storage.put(&mut write_txn, key, entry)?;
        write_txn.commit()
    }
}

impl Cache for LocalCache {
    fn get(&self, namespace: &str, params: &Value) -> Result<Option<Value>> {
        let key = CacheKey::new(namespace, params).to_string();
        let now = (self.clock)();

        let entry = {
            let read_txn = self.env.read_txn()?;
            self.storage.get(&read_txn, &key)?
        };

        match entry {
            Some(entry) if !self.is_expired(&entry, now) => Ok(Some(entry.value)),
            Some(_) => {
                let mut write_txn = self.env.write_txn()?;
                // another writer may have refreshed the entry in between
                let still_stale = self
                    .storage
                    .get(&write_txn, &key)?
                    .is_some_and(|entry| self.is_expired(&entry, now));
                if still_stale {
                    self.storage.delete(&mut write_txn, &key)?;
                }
                write_txn.commit()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, namespace: &str, params: &Value, value: &Value) -> Result<()> {
        let key = CacheKey::new(namespace, params).to_string();
        let entry = CacheEntry {
            created_at: (self.clock)(),
            value: value.clone(),
        };

        // Overflow pages for the entry plus slack for a leaf split.
        let encoded = key.len() + serde_json::to_vec(&entry)?.len();
        let incoming = ((encoded.div_ceil(PAGE_SIZE) + 2) * PAGE_SIZE) as u64;
        if incoming > self.capacity {
            return Err(anyhow!(
                "cache entry of {} bytes exceeds the cache capacity",
                incoming
            ));
        }
        self.make_room(incoming)?;

        match self.put(&key, &entry) {
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                self.evict_oldest(self.capacity / 2)?;
                self.put(&key, &entry)?;
            }
            result => result?,
        }
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = (self.clock)();

        let keys_to_purge = {
            let read_txn = self.env.read_txn()?;
            let mut keys_to_purge = Vec::new();

            for item in self.storage.iter(&read_txn)? {
                let (key, entry) = item?;
                if self.is_expired(&entry, now) {
                    keys_to_purge.push(key.to_owned());
                }
            }

            keys_to_purge
        };

        if keys_to_purge.is_empty() {
            return Ok(0);
        }

        let mut write_txn = self.env.write_txn()?;
        let mut purged = 0;
        for key in keys_to_purge {
            if self.storage.delete(&mut write_txn, &key)? {
                purged += 1;
            }
        }
        write_txn.commit()?;

        log::debug!("Purged {} expired cache entries", purged);
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    struct ManualClock {
        start: NaiveDateTime,
        offset_secs: Arc<AtomicI64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
                offset_secs: Arc::new(AtomicI64::new(0)),
            }
        }

        fn advance(&self, secs: i64) {
            self.offset_secs.fetch_add(secs, Ordering::SeqCst);
        }

        fn as_fn(&self) -> impl Fn() -> NaiveDateTime + Send + Sync + 'static {
            let start = self.start;
            let offset = self.offset_secs.clone();
            move || start + chrono::Duration::seconds(offset.load(Ordering::SeqCst))
        }
    }

    fn open(dir: &TempDir, clock: &ManualClock) -> LocalCache {
        LocalCache::new(dir.path().join("cache"), Some(Duration::from_secs(60)))
            .unwrap()
            .with_clock(clock.as_fn())
    }

    #[test]
    fn get_returns_what_set_stored() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);
        let params = json!({"q": "weather", "count": 2});
        let payload = json!({"results": [{"title": "t", "description": "d"}]});

        cache.set("search", &params, &payload).unwrap();

        assert_eq!(cache.get("search", &params).unwrap(), Some(payload));
    }

    #[test]
    fn lookup_ignores_parameter_order() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);

        cache
            .set("search", &json!({"q": "x", "count": 2}), &json!(["hit"]))
            .unwrap();

        assert_eq!(
            cache.get("search", &json!({"count": 2, "q": "x"})).unwrap(),
            Some(json!(["hit"]))
        );
        assert_eq!(cache.get("other", &json!({"q": "x", "count": 2})).unwrap(), None);
    }

    #[test]
    fn missing_entry_is_absent() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);

        assert_eq!(cache.get("search", &json!({"q": "nothing"})).unwrap(), None);
    }

    #[test]
    fn entry_expires_after_max_age() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);
        let params = json!({"q": "x"});

        cache.set("search", &params, &json!("value")).unwrap();

        clock.advance(60);
        assert_eq!(cache.get("search", &params).unwrap(), Some(json!("value")));

        clock.advance(1);
        assert_eq!(cache.get("search", &params).unwrap(), None);
        // the stale entry was removed on read
        assert_eq!(cache.purge_expired().unwrap(), 0);
    }

    #[test]
    fn later_write_supersedes_earlier() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);
        let params = json!({"q": "x"});

        cache.set("search", &params, &json!("first")).unwrap();
        clock.advance(45);
        cache.set("search", &params, &json!("second")).unwrap();
        clock.advance(45);

        assert_eq!(cache.get("search", &params).unwrap(), Some(json!("second")));
    }

    #[test]
    fn purge_removes_only_stale_entries() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open(&dir, &clock);

        cache.set("search", &json!({"q": "old"}), &json!(1)).unwrap();
        cache.set("search", &json!({"q": "older"}), &json!(2)).unwrap();
        clock.advance(50);
        cache.set("search", &json!({"q": "fresh"}), &json!(3)).unwrap();
        clock.advance(20);

        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert_eq!(cache.get("search", &json!({"q": "fresh"})).unwrap(), Some(json!(3)));
    }

    #[test]
    fn entries_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let params = json!({"q": "persisted"});

        {
            let cache = open(&dir, &clock);
            cache.set("search", &params, &json!("kept")).unwrap();
        }

        let cache = open(&dir, &clock);
        assert_eq!(cache.get("search", &params).unwrap(), Some(json!("kept")));
    }

    fn open_small(dir: &TempDir, clock: &ManualClock, max_age: u64) -> LocalCache {
        LocalCache::with_map_size(
            dir.path().join("cache"),
            Some(Duration::from_secs(max_age)),
            1024 * 1024,
        )
        .unwrap()
        .with_clock(clock.as_fn())
    }

    fn payload(i: usize) -> Value {
        json!(format!("{:05}{}", i, "x".repeat(10_000)))
    }

    #[test]
    fn expired_entries_make_room_for_new_ones() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open_small(&dir, &clock, 60);

        for i in 0..25 {
            cache.set("old", &json!({"q": i}), &payload(i)).unwrap();
        }
        clock.advance(61);

        for i in 0..20 {
            cache.set("fresh", &json!({"q": i}), &payload(i)).unwrap();
        }

        for i in 0..20 {
            assert_eq!(cache.get("fresh", &json!({"q": i})).unwrap(), Some(payload(i)));
        }
        assert!(cache.used_bytes().unwrap() <= cache.capacity);
    }

    #[test]
    fn full_store_evicts_oldest_entries() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open_small(&dir, &clock, 3600);

        for i in 0..150 {
            cache.set("search", &json!({"q": i}), &payload(i)).unwrap();
            clock.advance(1);
        }

        assert_eq!(cache.get("search", &json!({"q": 0})).unwrap(), None);
        assert_eq!(cache.get("search", &json!({"q": 149})).unwrap(), Some(payload(149)));
        assert!(cache.used_bytes().unwrap() <= cache.capacity);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let cache = open_small(&dir, &clock, 60);

        let huge = json!("x".repeat(600 * 1024));
        assert!(cache.set("search", &json!({"q": "huge"}), &huge).is_err());
        assert_eq!(cache.get("search", &json!({"q": "huge"})).unwrap(), None);
    }
}

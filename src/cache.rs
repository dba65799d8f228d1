//! Bounded persistent cache for dashboard snapshots.
//!
//! One JSON envelope file per key (`{ "data": ..., "timestamp": "<rfc3339>" }`)
//! under the state directory, fronted by a concurrent hot index so repeated
//! reads skip deserialization. TTL is validated on read; an expired entry is
//! purged and treated as a miss. Persistence is advisory: oversized payloads
//! are rejected with a warning, a write past the store budget triggers one
//! eviction-and-retry pass, and a write that still fails is dropped. Nothing
//! in the load path depends on a write landing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheSettings;
use crate::error::CacheError;
use crate::types::DatasetIdentity;
use crate::util::{atomic_write_str, sanitize_key};

/// Entries older than this are fair game for the quota eviction pass.
const EVICTION_AGE: Duration = Duration::from_secs(3600);

/// On-disk envelope. The persisted layout owns exactly these two fields;
/// per-write TTL overrides live in the hot index and are process-local.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Envelope {
    data: serde_json::Value,
    timestamp: String,
}

#[derive(Debug, Clone)]
struct HotEntry {
    stored_at: DateTime<Utc>,
    ttl: Duration,
    bytes: u64,
}

impl HotEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.stored_at).num_milliseconds().max(0) as u128;
        age_ms > self.ttl.as_millis()
    }
}

/// Metadata for one cache entry, for diagnostics (`cache_report`).
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    pub bytes: u64,
    pub stored_at: DateTime<Utc>,
    pub expired: bool,
}

pub struct DiskCache {
    dir: PathBuf,
    default_ttl: Duration,
    max_entry_bytes: usize,
    max_elements: usize,
    max_store_bytes: u64,
    hot: DashMap<String, HotEntry>,
    /// Self-handle for moving deferred writes onto a task. The cache is only
    /// ever handed out behind an `Arc`, so upgrades cannot fail in practice.
    self_ref: std::sync::Weak<DiskCache>,
}

impl DiskCache {
    /// Open (or create) a cache directory and index its existing entries.
    /// Files that no longer parse as envelopes are removed on the spot.
    pub fn open(dir: impl Into<PathBuf>, settings: &CacheSettings) -> Result<Arc<Self>, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let cache = Arc::new_cyclic(|weak| Self {
            dir,
            default_ttl: Duration::from_secs(settings.ttl_secs),
            max_entry_bytes: settings.max_entry_bytes,
            max_elements: settings.max_elements,
            max_store_bytes: settings.max_store_bytes,
            hot: DashMap::new(),
            self_ref: weak.clone(),
        });
        cache.index_existing();
        Ok(cache)
    }

    fn index_existing(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cache: failed to scan {}: {}", self.dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
            else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match read_envelope(&path) {
                Ok((envelope, bytes)) => {
                    let stored_at = parse_timestamp(&envelope.timestamp);
                    self.hot.insert(
                        key,
                        HotEntry {
                            stored_at,
                            ttl: self.default_ttl,
                            bytes,
                        },
                    );
                }
                Err(e) => {
                    log::warn!("cache: removing unreadable entry {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Read an entry, validating TTL. Expired or unreadable entries are
    /// deleted and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        let sanitized = sanitize_key(key);

        let entry = match self.hot.get(&sanitized) {
            Some(entry) => entry.value().clone(),
            // Not indexed: another process may have written it. Judge it
            // against the default window.
            None => {
                let path = self.entry_path(key);
                if !path.exists() {
                    return None;
                }
                let (envelope, bytes) = read_envelope(&path).ok()?;
                let entry = HotEntry {
                    stored_at: parse_timestamp(&envelope.timestamp),
                    ttl: self.default_ttl,
                    bytes,
                };
                self.hot.insert(sanitized.clone(), entry.clone());
                entry
            }
        };

        if entry.is_expired(now) {
            log::debug!("cache: '{}' expired, purging", key);
            self.remove(key);
            return None;
        }

        let path = self.entry_path(key);
        match read_envelope(&path) {
            Ok((envelope, _)) => match serde_json::from_value(envelope.data) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!("cache: '{}' failed to decode, purging: {}", key, e);
                    self.remove(key);
                    None
                }
            },
            Err(_) => {
                self.hot.remove(&sanitized);
                None
            }
        }
    }

    /// Store an entry with the given TTL. Validation happens on the caller's
    /// thread; the disk write is deferred to a spawned task so persistence
    /// never blocks the producer. Rejections and dropped writes are logged,
    /// never surfaced.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let body = match self.encode(value) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("cache: rejected write for '{}': {}", key, e);
                return;
            }
        };

        let Some(cache) = self.self_ref.upgrade() else {
            return;
        };
        let key = key.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = cache.write_now(&key, body, ttl) {
                        log::warn!("cache: dropped write for '{}': {}", key, e);
                    }
                });
            }
            // No runtime (sync callers): write inline.
            Err(_) => {
                if let Err(e) = cache.write_now(&key, body, ttl) {
                    log::warn!("cache: dropped write for '{}': {}", key, e);
                }
            }
        }
    }

    /// Serialize and validate a payload against the admission caps.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CacheError> {
        let data = serde_json::to_value(value)?;

        if let Some(array) = data.as_array() {
            if array.len() > self.max_elements {
                return Err(CacheError::TooManyElements {
                    count: array.len(),
                    cap: self.max_elements,
                });
            }
        }

        let payload_bytes = serde_json::to_string(&data)?.len();
        if payload_bytes > self.max_entry_bytes {
            return Err(CacheError::PayloadTooLarge {
                bytes: payload_bytes,
                cap: self.max_entry_bytes,
            });
        }

        let envelope = Envelope {
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Write an encoded envelope, with one eviction-and-retry pass if the
    /// first attempt fails (quota or I/O).
    fn write_now(&self, key: &str, body: String, ttl: Duration) -> Result<(), CacheError> {
        match self.try_write(key, &body, ttl) {
            Ok(()) => Ok(()),
            Err(first) => {
                let evicted = self.evict_older_than(EVICTION_AGE);
                log::info!(
                    "cache: write for '{}' failed ({}), evicted {} stale entries, retrying once",
                    key,
                    first,
                    evicted
                );
                self.try_write(key, &body, ttl)
            }
        }
    }

    fn try_write(&self, key: &str, body: &str, ttl: Duration) -> Result<(), CacheError> {
        let sanitized = sanitize_key(key);
        let new_bytes = body.len() as u64;
        let replaced = self
            .hot
            .get(&sanitized)
            .map(|entry| entry.bytes)
            .unwrap_or(0);

        if self.store_bytes() - replaced + new_bytes > self.max_store_bytes {
            return Err(CacheError::QuotaExhausted);
        }

        atomic_write_str(&self.entry_path(key), body)?;
        self.hot.insert(
            sanitized,
            HotEntry {
                stored_at: Utc::now(),
                ttl,
                bytes: new_bytes,
            },
        );
        Ok(())
    }

    /// Remove entries older than `age`. Returns how many were evicted.
    fn evict_older_than(&self, age: Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .hot
            .iter()
            .filter(|entry| {
                let entry_age = (now - entry.value().stored_at).num_seconds().max(0) as u64;
                entry_age > age.as_secs()
            })
            .map(|entry| entry.key().clone())
            .collect();

        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    pub fn remove(&self, key: &str) {
        let sanitized = sanitize_key(key);
        self.hot.remove(&sanitized);
        let _ = fs::remove_file(self.entry_path(key));
    }

    /// Drop the records and metrics entries for one dataset identity.
    pub fn clear_dataset(&self, identity: &DatasetIdentity) {
        self.remove(&identity.records_key());
        self.remove(&identity.metrics_key());
    }

    /// Purge every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .hot
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        if !expired.is_empty() {
            log::debug!("cache: swept {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Total bytes currently indexed.
    pub fn store_bytes(&self) -> u64 {
        self.hot.iter().map(|entry| entry.value().bytes).sum()
    }

    /// Snapshot of every indexed entry, sorted by key, for diagnostics.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let now = Utc::now();
        let mut infos: Vec<CacheEntryInfo> = self
            .hot
            .iter()
            .map(|entry| CacheEntryInfo {
                key: entry.key().clone(),
                bytes: entry.value().bytes,
                stored_at: entry.value().stored_at,
                expired: entry.value().is_expired(now),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }
}

fn read_envelope(path: &Path) -> Result<(Envelope, u64), CacheError> {
    let content = fs::read_to_string(path)?;
    let envelope: Envelope = serde_json::from_str(&content)?;
    Ok((envelope, content.len() as u64))
}

/// Parse an envelope timestamp; unparseable values date the entry to the
/// epoch so it expires immediately instead of living forever.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

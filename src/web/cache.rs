//! Time-bounded response cache for read-style endpoints.
//!
//! Entries are written once and become invisible at `expires_at`; there is
//! no other invalidation. With caching disabled every lookup misses and
//! every store is dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use sha1::{Digest, Sha1};

use crate::sys_debug;

/// Endpoint families with independently configurable lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    Classification,
    Explanation,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub classification_ttl: Duration,
    pub explanation_ttl: Duration,
}

impl CacheSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            classification_ttl: Duration::ZERO,
            explanation_ttl: Duration::ZERO,
        }
    }
}

/// A complete response as it was sent the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

struct CacheEntry {
    value: CachedResponse,
    expires_at: Instant,
}

pub struct ResponseCache {
    settings: CacheSettings,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn ttl_for(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Classification => self.settings.classification_ttl,
            CacheClass::Explanation => self.settings.explanation_ttl,
        }
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.settings.enabled {
            return None;
        }
        let mut entries = self.entries.lock().ok()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                sys_debug!("[CACHE] Hit {key}");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` for `ttl`. A live entry under the same key is kept as is.
    pub fn put(&self, key: &str, value: CachedResponse, ttl: Duration) {
        if !self.settings.enabled || ttl.is_zero() {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
            value,
            expires_at: now + ttl,
        });
    }

    /// Number of stored entries, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for lookups identified by their path.
pub fn path_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

/// Cache key for submissions identified by the digest of their body.
pub fn body_key(method: &Method, path: &str, body: &[u8]) -> String {
    let digest = Sha1::digest(body);
    format!("{method} {path} sha1:{digest:x}")
}

//! Named, versioned request → response stores.
//!
//! ```text
//! CacheStorage (host level, shared by every controller version)
//!     ├── admin-cache-v1   (Cache)
//!     └── admin-cache-v2   (Cache)
//!             └── GET url → CacheEntry
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use shellcache_net::{Request, Response, ResponseSource};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::CacheError;

// ==================== Cache Entry ====================

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (fragment removed).
    pub url: String,

    /// Request method. Always `GET`.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers, in order, duplicates preserved. Values are raw
    /// bytes; they need not be visible ASCII.
    #[serde(with = "header_base64")]
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    fn from_response(key: &Url, response: &Response) -> Self {
        Self {
            url: key.to_string(),
            method: Method::GET.to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| {
                    (name.as_str().to_string(), Bytes::copy_from_slice(value.as_bytes()))
                })
                .collect(),
            body: response.body.clone(),
            stored_at: now_millis(),
        }
    }

    /// Rebuild the response this entry was stored from.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url).map_err(|e| CacheError::invalid_entry(&self.url, e))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::invalid_entry(&self.url, e))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CacheError::invalid_entry(&self.url, e))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| CacheError::invalid_entry(&self.url, e))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone(),
            source: ResponseSource::Cache,
        })
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

mod header_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        headers: &[(String, Bytes)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        headers
            .iter()
            .map(|(name, value)| (name.as_str(), STANDARD.encode(value)))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, Bytes)>, D::Error> {
        Vec::<(String, String)>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded)
                    .map(|value| (name, Bytes::from(value)))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache ====================

/// One cache generation.
///
/// Cloning yields another handle to the same entries. A handle outlives
/// [`CacheStorage::delete`]; writes through it then land in a detached map
/// nobody can enumerate.
#[derive(Debug, Clone)]
pub struct Cache {
    name: Arc<str>,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Cache {
    fn new(name: &str) -> Self {
        Self::with_entries(name, HashMap::new())
    }

    fn with_entries(name: &str, entries: HashMap<String, CacheEntry>) -> Self {
        Self {
            name: Arc::from(name),
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the stored response for a request. Only `GET` requests can match.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        self.match_url(&request.url_without_fragment()).await
    }

    /// Look up the stored response for a URL.
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        let mut key = url.clone();
        key.set_fragment(None);

        let entries = self.entries.read().await;
        let entry = entries.get(key.as_str())?;
        match entry.to_response() {
            Ok(response) => {
                trace!(cache = %self.name, url = %key, "Cache hit");
                Some(response)
            }
            Err(e) => {
                warn!(cache = %self.name, url = %key, error = %e, "Ignoring unreadable entry");
                None
            }
        }
    }

    /// Store (or overwrite) the response for a request.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }

        let key = request.url_without_fragment();
        let entry = CacheEntry::from_response(&key, response);
        trace!(cache = %self.name, url = %key, status = entry.status, "Cache put");
        self.entries.write().await.insert(key.into(), entry);
        Ok(())
    }

    /// Delete the entry for a request.
    pub async fn delete(&self, request: &Request) -> bool {
        let key = request.url_without_fragment();
        self.entries.write().await.remove(key.as_str()).is_some()
    }

    /// All stored URLs, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn snapshot(&self) -> CacheSnapshot {
        let entries = self.entries.read().await;
        let mut entries: Vec<CacheEntry> = entries.values().cloned().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        CacheSnapshot {
            name: self.name.to_string(),
            entries,
        }
    }
}

// ==================== Cache Storage ====================

/// Cache storage shared by every controller version of one origin.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    caches: Arc<RwLock<HashMap<String, Cache>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    name: String,
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageSnapshot {
    caches: Vec<CacheSnapshot>,
}

impl CacheStorage {
    /// Create new, empty cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if it doesn't exist).
    pub async fn open(&self, name: &str) -> Cache {
        if let Some(cache) = self.caches.read().await.get(name) {
            return cache.clone();
        }

        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = %name, "Creating cache");
                Cache::new(name)
            })
            .clone()
    }

    /// Check if a cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a cache. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.caches.write().await.remove(name).is_some();
        if removed {
            debug!(cache = %name, "Deleted cache");
        }
        removed
    }

    /// All cache names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.caches.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Write every cache to a JSON snapshot.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let caches: Vec<Cache> = self.caches.read().await.values().cloned().collect();

        let mut snapshot = StorageSnapshot::default();
        for cache in caches {
            snapshot.caches.push(cache.snapshot().await);
        }
        snapshot.caches.sort_by(|a, b| a.name.cmp(&b.name));

        let raw = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, raw)
            .await
            .map_err(|source| CacheError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(path = %path.display(), caches = snapshot.caches.len(), "Saved cache storage");
        Ok(())
    }

    /// Load storage from a JSON snapshot. A missing file yields empty storage.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let snapshot: StorageSnapshot = serde_json::from_slice(&raw)?;
        let caches = snapshot
            .caches
            .into_iter()
            .map(|c| {
                let entries = c
                    .entries
                    .into_iter()
                    .map(|entry| (entry.url.clone(), entry))
                    .collect();
                (c.name.clone(), Cache::with_entries(&c.name, entries))
            })
            .collect();

        Ok(Self {
            caches: Arc::new(RwLock::new(caches)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};

    fn get(s: &str) -> Request {
        Request::get(Url::parse(s).unwrap())
    }

    fn ok(s: &str, body: &'static str) -> Response {
        Response::new(Url::parse(s).unwrap(), StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let cache = CacheStorage::new().open("admin-cache-v1").await;
        let request = get("https://example.com/styles.css");

        cache
            .put(&request, &ok("https://example.com/styles.css", "body{}"))
            .await
            .unwrap();

        let hit = cache.match_request(&request).await.unwrap();
        assert_eq!(hit.text(), "body{}");
        assert!(hit.is_from_cache());
        assert!(cache
            .match_request(&get("https://example.com/other.css"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_fragment_is_ignored() {
        let cache = CacheStorage::new().open("v1").await;
        cache
            .put(&get("https://example.com/index.html#top"), &ok("https://example.com/index.html", "<html>"))
            .await
            .unwrap();
        assert!(cache
            .match_request(&get("https://example.com/index.html"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_non_get_rejected() {
        let cache = CacheStorage::new().open("v1").await;
        let url = Url::parse("https://example.com/api/orders").unwrap();
        let request = Request::post(url.clone(), Bytes::from_static(b"{}"));

        let result = cache.put(&request, &ok(url.as_str(), "")).await;
        assert!(matches!(result, Err(CacheError::UnsupportedMethod(_))));
        assert!(cache.match_request(&request).await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let cache = CacheStorage::new().open("v1").await;
        let request = get("https://example.com/app.js");

        cache.put(&request, &ok("https://example.com/app.js", "one")).await.unwrap();
        cache.put(&request, &ok("https://example.com/app.js", "two")).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.match_request(&request).await.unwrap().text(), "two");
    }

    #[tokio::test]
    async fn test_headers_round_trip_through_entry() {
        let cache = CacheStorage::new().open("v1").await;
        let request = get("https://example.com/app.js");
        let response = ok("https://example.com/app.js", "x")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/javascript"));

        cache.put(&request, &response).await.unwrap();
        let hit = cache.match_request(&request).await.unwrap();
        assert_eq!(hit.content_type(), Some("text/javascript"));
    }

    fn attachment() -> Response {
        ok("https://example.com/invoice", "%PDF").with_header(
            CONTENT_DISPOSITION,
            HeaderValue::from_bytes("attachment; filename=\"café.pdf\"".as_bytes()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_non_ascii_header_survives_put() {
        let cache = CacheStorage::new().open("v1").await;
        let response = attachment();

        cache.put(&get("https://example.com/invoice"), &response).await.unwrap();
        let hit = cache.match_url(&Url::parse("https://example.com/invoice").unwrap()).await.unwrap();

        assert_eq!(hit.headers.len(), response.headers.len());
        assert_eq!(hit.headers.get(CONTENT_DISPOSITION), response.headers.get(CONTENT_DISPOSITION));
    }

    #[tokio::test]
    async fn test_non_ascii_header_survives_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");
        let storage = CacheStorage::new();
        storage
            .open("v1")
            .await
            .put(&get("https://example.com/invoice"), &attachment())
            .await
            .unwrap();
        storage.save_to(&path).await.unwrap();

        let hit = CacheStorage::load_from(&path)
            .await
            .unwrap()
            .open("v1")
            .await
            .match_url(&Url::parse("https://example.com/invoice").unwrap())
            .await
            .unwrap();
        assert_eq!(
            hit.headers.get(CONTENT_DISPOSITION).unwrap().as_bytes(),
            "attachment; filename=\"café.pdf\"".as_bytes()
        );
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = CacheStorage::new();

        assert!(!storage.has("v1").await);

        storage.open("v1").await;
        assert!(storage.has("v1").await);

        assert!(storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert!(!storage.delete("v1").await);
    }

    #[tokio::test]
    async fn test_open_returns_same_cache() {
        let storage = CacheStorage::new();
        let a = storage.open("v1").await;
        let b = storage.open("v1").await;
        a.put(&get("https://example.com/a.js"), &ok("https://example.com/a.js", "a"))
            .await
            .unwrap();
        assert_eq!(b.len().await, 1);
    }

    #[tokio::test]
    async fn test_deleted_cache_is_detached() {
        let storage = CacheStorage::new();
        let stale = storage.open("admin-cache-v1").await;
        storage.delete("admin-cache-v1").await;

        stale
            .put(&get("https://example.com/a.js"), &ok("https://example.com/a.js", "a"))
            .await
            .unwrap();

        assert!(!storage.has("admin-cache-v1").await);
        assert!(storage.open("admin-cache-v1").await.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");

        let storage = CacheStorage::new();
        let cache = storage.open("admin-cache-v2").await;
        cache
            .put(&get("https://example.com/icon-192.png"), &ok("https://example.com/icon-192.png", "\u{1}png"))
            .await
            .unwrap();
        storage.open("other-app-v1").await;
        storage.save_to(&path).await.unwrap();

        let restored = CacheStorage::load_from(&path).await.unwrap();
        assert_eq!(restored.keys().await, vec!["admin-cache-v2", "other-app-v1"]);
        let hit = restored
            .open("admin-cache-v2")
            .await
            .match_request(&get("https://example.com/icon-192.png"))
            .await
            .unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"\x01png"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::load_from(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");
        tokio::fs::write(&path, b"[1,2").await.unwrap();
        assert!(matches!(
            CacheStorage::load_from(&path).await,
            Err(CacheError::Corrupt(_))
        ));
    }
}

//! Result cache for read-only tools.
//!
//! LRU bounded by `max_size`, with a TTL per entry. Expired entries are
//! treated as absent on lookup regardless of their recency. Keys are derived
//! only from the tool name and its parameters, so identical calls always map
//! to the same entry.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use toolwright_core::{ToolParams, ToolResult};

struct CacheEntry {
    result: ToolResult,
    inserted_at: Instant,
    ttl: Duration,
    /// Recency stamp; the key in `CacheInner::recency`.
    last_used: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Recency stamp → key, oldest first.
    recency: BTreeMap<u64, String>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    /// Bumped by every invalidation; see [`ResultCache::set_if_current`].
    generation: u64,
}

impl CacheInner {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_used);
        Some(entry)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

/// LRU + TTL cache of successful tool results.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    /// Deterministic key for a call: SHA-256 of the canonical JSON of
    /// `{"tool": name, "params": params}` with keys sorted at every level.
    pub fn key_for(tool_name: &str, params: &ToolParams) -> String {
        let mut canonical = String::new();
        write_canonical(
            &serde_json::json!({ "tool": tool_name, "params": params }),
            &mut canonical,
        );
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Look up a key; hits come back with `cache_hit = true`.
    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let stamp = inner.next_stamp();
        let CacheInner {
            entries, recency, ..
        } = &mut *inner;
        let entry = entries.get_mut(key)?;
        recency.remove(&entry.last_used);
        entry.last_used = stamp;
        recency.insert(stamp, key.to_string());

        let mut result = entry.result.clone();
        inner.hits += 1;
        result.cache_hit = true;
        Some(result)
    }

    /// Store a result under `key`; `ttl = None` uses the default TTL.
    pub fn set(&self, key: &str, result: &ToolResult, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.insert(&mut inner, key, result, ttl);
    }

    fn insert(&self, inner: &mut CacheInner, key: &str, result: &ToolResult, ttl: Option<Duration>) {
        let mut stored = result.clone();
        stored.cache_hit = false;
        stored.cache_key = Some(key.to_string());

        inner.remove(key);
        let stamp = inner.next_stamp();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                result: stored,
                inserted_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                last_used: stamp,
            },
        );
        inner.recency.insert(stamp, key.to_string());

        while inner.entries.len() > self.max_size {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.evictions += 1;
        }
    }

    /// Current invalidation generation. Capture it before computing a
    /// result and hand it to [`set_if_current`](Self::set_if_current).
    pub fn generation(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generation
    }

    /// Store a result only if no invalidation happened since `generation`
    /// was read. Returns whether the result was stored.
    pub fn set_if_current(
        &self,
        key: &str,
        result: &ToolResult,
        ttl: Option<Duration>,
        generation: u64,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.generation != generation {
            tracing::debug!(key, "Result computed before an invalidation, not cached");
            return false;
        }
        self.insert(&mut inner, key, result, ttl);
        true
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation += 1;
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Result cache cleared");
        }
    }

    /// Remove entries produced by any of the named tools.
    pub fn invalidate_tools(&self, tool_names: &[&str]) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.generation += 1;
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| tool_names.contains(&e.result.tool_name.as_str()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    /// Sweep expired entries; returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

/// Serialize `value` with object keys sorted at every depth.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> ToolParams {
        value.as_object().cloned().unwrap()
    }

    fn result(tool: &str, n: i64) -> ToolResult {
        ToolResult::ok(tool, json!({ "n": n }))
    }

    #[test]
    fn key_is_order_independent_and_fixed_length() {
        let a = ResultCache::key_for("search", &params(json!({"q": "x", "limit": 5})));
        let b = ResultCache::key_for("search", &params(json!({"limit": 5, "q": "x"})));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let nested_a =
            ResultCache::key_for("search", &params(json!({"f": {"b": 1, "a": [1, {"y": 2, "x": 1}]}})));
        let nested_b =
            ResultCache::key_for("search", &params(json!({"f": {"a": [1, {"x": 1, "y": 2}], "b": 1}})));
        assert_eq!(nested_a, nested_b);
    }

    #[test]
    fn key_distinguishes_tool_and_params() {
        let p = params(json!({"id": 1}));
        assert_ne!(
            ResultCache::key_for("get_invoice", &p),
            ResultCache::key_for("get_quote", &p)
        );
        assert_ne!(
            ResultCache::key_for("get_invoice", &p),
            ResultCache::key_for("get_invoice", &params(json!({"id": 2})))
        );
    }

    #[tokio::test]
    async fn set_then_get_marks_cache_hit() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        let stored = result("get_invoice", 1);
        cache.set("k", &stored, None);

        let hit = cache.get("k").unwrap();
        assert!(hit.cache_hit);
        assert_eq!(hit.data, stored.data);
        assert_eq!(hit.cache_key.as_deref(), Some("k"));

        let mut expected = stored.clone();
        expected.cache_hit = true;
        expected.cache_key = Some("k".into());
        assert_eq!(hit, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_absent() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.set("short", &result("a", 1), Some(Duration::from_secs(5)));
        cache.set("long", &result("a", 2), None);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_sweeps_expired() {
        let cache = ResultCache::new(10, Duration::from_secs(1));
        cache.set("a", &result("a", 1), None);
        cache.set("b", &result("a", 2), Some(Duration::from_secs(100)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.set("a", &result("t", 1), None);
        cache.set("b", &result("t", 2), None);
        // touch "a" so "b" becomes the oldest
        assert!(cache.get("a").is_some());
        cache.set("c", &result("t", 3), None);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn overwrite_does_not_grow() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.set("a", &result("t", 1), None);
        cache.set("a", &result("t", 2), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().data, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn invalidate_tools_is_selective() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.set("1", &result("get_invoice", 1), None);
        cache.set("2", &result("get_invoice", 2), None);
        cache.set("3", &result("get_client", 3), None);

        assert_eq!(cache.invalidate_tools(&["get_invoice"]), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("3").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn stale_results_are_not_stored_after_invalidation() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        let before = cache.generation();
        cache.clear();
        assert!(!cache.set_if_current("k", &result("get_balance", 100), None, before));
        assert!(cache.get("k").is_none());

        let before = cache.generation();
        cache.invalidate_tools(&["get_client"]);
        assert!(!cache.set_if_current("k", &result("get_balance", 100), None, before));

        let current = cache.generation();
        assert!(cache.set_if_current("k", &result("get_balance", 0), None, current));
        assert_eq!(cache.get("k").unwrap().data, Some(json!({"n": 0})));
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_and_expiry_on_the_same_cache() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.set("short", &result("t", 1), Some(Duration::from_secs(5)));
        cache.set("a", &result("t", 2), None);
        // "short" is the least recently used, so it is evicted first
        cache.set("b", &result("t", 3), None);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("short").is_none());

        cache.set("brief", &result("t", 4), Some(Duration::from_secs(5)));
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.get("a").is_none());

        // recently used but expired still counts as absent
        assert!(cache.get("brief").is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("brief").is_none());
        assert!(cache.get("b").is_some());

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.set("k", &result("t", 1), None);
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }
}

//! Optional memoization for the Masking stage.
//!
//! Several call paths can re-run masking on identical case input. Whether
//! to memoize is a cost/latency trade-off: model output is
//! non-deterministic, so a cache trades freshness for fewer calls. The
//! pipeline runs uncached by default; pass a cache to opt in. Keys are
//! content hashes, so renamed cases with identical text still hit.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Cache key for one masking call: model, unit and input-text hash.
#[derive(Debug, Clone)]
pub struct MaskCacheKey {
    pub model: String,
    pub unit: &'static str,
    pub text_hash: String,
    pub key_hash: String,
}

impl MaskCacheKey {
    pub fn new(model: &str, unit: &'static str, text: &str) -> Self {
        let text_hash = blake3::hash(text.as_bytes()).to_hex().to_string();
        let key_hash = blake3::hash(format!("{model}\n{unit}\n{text_hash}").as_bytes())
            .to_hex()
            .to_string();
        Self {
            model: model.to_string(),
            unit,
            text_hash,
            key_hash,
        }
    }
}

/// Store for masked text keyed by input content.
#[async_trait]
pub trait MaskCache: Send + Sync {
    async fn get(&self, key: &MaskCacheKey) -> Option<String>;
    async fn put(&self, key: &MaskCacheKey, masked: &str);
}

/// In-memory cache with process lifetime. Cross-run persistence is out
/// of scope for the pipeline.
#[derive(Debug, Default)]
pub struct MemoryMaskCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryMaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("mask cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MaskCache for MemoryMaskCache {
    async fn get(&self, key: &MaskCacheKey) -> Option<String> {
        self.entries
            .lock()
            .expect("mask cache poisoned")
            .get(&key.key_hash)
            .cloned()
    }

    async fn put(&self, key: &MaskCacheKey, masked: &str) {
        self.entries
            .lock()
            .expect("mask cache poisoned")
            .insert(key.key_hash.clone(), masked.to_string());
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Clone, Debug)]
struct Entry {
    target: String,
    text: String,
}

/// Segment translation cache keyed by `sha256(src, dst, text)`, with both language tags
/// trimmed and lowercased but otherwise kept whole.
///
/// Holds plain translated text; direction annotation is applied by callers after lookup.
#[derive(Debug, Default)]
pub struct TranslationCache {
    entries: Mutex<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

pub fn cache_key(src: &str, dst: &str, text: &str) -> String {
    let mut h = Sha256::new();
    h.update(src.trim().to_ascii_lowercase().as_bytes());
    h.update([0u8]);
    h.update(dst.trim().to_ascii_lowercase().as_bytes());
    h.update([0u8]);
    h.update(text.as_bytes());
    hex::encode(h.finalize())
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, src: &str, dst: &str, text: &str) -> Option<String> {
        let key = cache_key(src, dst, text);
        let found = self
            .entries
            .lock()
            .ok()
            .and_then(|m| m.get(&key).map(|e| e.text.clone()));
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, src: &str, dst: &str, text: &str, translated: &str) {
        let key = cache_key(src, dst, text);
        if let Ok(mut m) = self.entries.lock() {
            m.insert(
                key,
                Entry {
                    target: dst.trim().to_ascii_lowercase(),
                    text: translated.to_string(),
                },
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.entries.lock() {
            m.clear();
        }
    }

    /// Drops every entry translated into `lang`. Returns how many were removed.
    pub fn invalidate_target(&self, lang: &str) -> usize {
        let lang = lang.trim().to_ascii_lowercase();
        let Ok(mut m) = self.entries.lock() else {
            return 0;
        };
        let before = m.len();
        m.retain(|_, e| e.target != lang);
        before - m.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

//! Compiled template caching.
//!
//! Templates are keyed by the SHA-256 fingerprint of their source text, so
//! every rule sharing a template string shares one compiled template. Entries
//! are never evicted: the number of distinct templates is bounded by the
//! configured rules, not by request volume.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::template::{Template, TemplateError};

/// Hex-encoded SHA-256 digest of a template's source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateFingerprint(String);

impl TemplateFingerprint {
    /// Compute the fingerprint of `source`.
    pub fn of(source: &str) -> Self {
        Self(hex::encode(Sha256::digest(source.as_bytes())))
    }

    /// The fingerprint as lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to compile.
    pub misses: u64,
    /// Successful compilations, including ones that lost an insert race.
    pub compilations: u64,
    /// Number of templates currently cached.
    pub size: usize,
}

/// Process-lifetime cache of compiled templates.
///
/// Lookups take a read lock. On a miss the template is compiled outside any
/// lock and inserted with `entry().or_insert`, so two workers racing on the
/// same fingerprint both get the template that was stored first.
#[derive(Debug, Default)]
pub struct TemplateCache {
    /// Compiled templates by fingerprint.
    entries: RwLock<HashMap<TemplateFingerprint, Arc<Template>>>,
    /// Cache hit counter.
    hits: AtomicU64,
    /// Cache miss counter.
    misses: AtomicU64,
    /// Compilation counter.
    compilations: AtomicU64,
}

impl TemplateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the template stored under `fingerprint`, compiling `source` on
    /// a miss.
    ///
    /// A compile failure is returned and nothing is stored.
    pub fn get_or_compile(
        &self,
        fingerprint: &TemplateFingerprint,
        source: &str,
    ) -> Result<Arc<Template>, TemplateError> {
        if let Some(template) = self.get(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(template);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let compiled = Arc::new(Template::parse(source)?);
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint, "compiled template");

        let mut entries = self.entries.write();
        let stored = entries
            .entry(fingerprint.clone())
            .or_insert(compiled);
        Ok(Arc::clone(stored))
    }

    /// Look up a compiled template without compiling.
    pub fn get(&self, fingerprint: &TemplateFingerprint) -> Option<Arc<Template>> {
        self.entries.read().get(fingerprint).cloned()
    }

    /// Number of cached templates.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

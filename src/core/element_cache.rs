//! Per-control cache of converted layer elements.
//!
//! Structure: HashMap<key, ElementCacheEntry> where key is the element id with
//! any composite prefix applied (`comp1-<hash>/inner1`).
//!
//! Invalidation is deferred. Three queues collect requests between passes:
//! - direct ids (element edited, feedback override changed)
//! - composite types (`connectionId:elementId` definition changed)
//! - variables (value changed)
//!
//! `apply_queued_invalidations()` drains all three at the start of a pass.
//! Structural removal is handled separately by `purge_unused_elements()` after
//! the pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use serde_json::Value;

use crate::graphics::draw::DrawElement;

/// Lookup counters, readable while a pass holds the cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Composite expansion details kept with a composite's entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeCacheInfo {
    /// `connectionId:elementId` of the definition.
    pub composite_element_id: String,
    /// Resolved option values the children were evaluated with.
    pub child_prop_overrides: HashMap<String, Value>,
    /// Prefix applied to every child key of this instance.
    pub child_id_prefix: String,
}

/// One cached conversion result.
///
/// Groups and composites store only their own shell (no children); children
/// have entries of their own.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCacheEntry {
    /// `None` when the element contributes nothing (disabled, missing composite).
    pub draw_element: Option<DrawElement>,
    pub used_variables: HashSet<String>,
    pub composite: Option<CompositeCacheInfo>,
}

#[derive(Debug, Default)]
pub struct ElementConversionCache {
    entries: HashMap<String, ElementCacheEntry>,
    queued_ids: HashSet<String>,
    queued_composite_types: HashSet<String>,
    queued_variables: HashSet<String>,
    stats: CacheStats,
}

impl ElementConversionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `key` without touching statistics.
    pub fn get(&self, key: &str) -> Option<&ElementCacheEntry> {
        self.entries.get(key)
    }

    /// Entry usable by a pass, recording a hit or miss.
    ///
    /// Entries without a draw element are only valid for `only_enabled` passes;
    /// a pass that also outputs disabled elements must re-resolve them.
    pub fn lookup(&self, key: &str, only_enabled: bool) -> Option<&ElementCacheEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.draw_element.is_some() || only_enabled => {
                trace!("Element cache hit: {}", key);
                self.stats.record(true);
                Some(entry)
            }
            _ => {
                trace!("Element cache miss: {}", key);
                self.stats.record(false);
                None
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: ElementCacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Keys of all entries under a composite child prefix.
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.entries.keys().filter(move |k| k.starts_with(prefix))
    }

    /// Patch rasterized image data into a cached image entry.
    pub fn set_image_data(&mut self, key: &str, data: Option<String>) -> bool {
        match self.entries.get_mut(key).and_then(|e| e.draw_element.as_mut()) {
            Some(DrawElement::Image(image)) => {
                image.base64_image = data;
                true
            }
            _ => false,
        }
    }

    // ========== Deferred invalidation ==========

    pub fn queue_invalidate(&mut self, id: impl Into<String>) {
        self.queued_ids.insert(id.into());
    }

    pub fn queue_invalidate_composite_type<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queued_composite_types.extend(ids.into_iter().map(Into::into));
    }

    pub fn queue_invalidate_variables<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queued_variables.extend(ids.into_iter().map(Into::into));
    }

    pub fn has_queued_invalidations(&self) -> bool {
        !(self.queued_ids.is_empty() && self.queued_composite_types.is_empty() && self.queued_variables.is_empty())
    }

    /// Drain all queues into evictions. Returns the number of entries evicted.
    pub fn apply_queued_invalidations(&mut self) -> usize {
        if !self.has_queued_invalidations() {
            return 0;
        }
        let before = self.entries.len();

        // 1. Exact ids
        for id in &self.queued_ids {
            self.entries.remove(id);
        }

        // 2. Composite instances of a changed type, with everything under their prefix
        if !self.queued_composite_types.is_empty() {
            let prefixes: Vec<String> = self
                .entries
                .values()
                .filter_map(|e| e.composite.as_ref())
                .filter(|c| self.queued_composite_types.contains(&c.composite_element_id))
                .map(|c| c.child_id_prefix.clone())
                .collect();
            let queued = &self.queued_composite_types;
            self.entries.retain(|key, entry| {
                let is_instance = entry
                    .composite
                    .as_ref()
                    .is_some_and(|c| queued.contains(&c.composite_element_id));
                !is_instance && !prefixes.iter().any(|p| key.starts_with(p.as_str()))
            });
        }

        // 3. Entries that consulted a changed variable
        if !self.queued_variables.is_empty() {
            let vars = &self.queued_variables;
            self.entries.retain(|_, entry| entry.used_variables.is_disjoint(vars));
        }

        self.queued_ids.clear();
        self.queued_composite_types.clear();
        self.queued_variables.clear();

        let evicted = before - self.entries.len();
        debug!("Applied queued invalidations: {} entries evicted, {} remain", evicted, self.entries.len());
        evicted
    }

    /// Remove every entry whose key is not in `active`. Returns the number removed.
    pub fn purge_unused_elements(&mut self, active: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| active.contains(key));
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!("Purged {} unused element cache entries", purged);
        }
        purged
    }

    /// Drop all entries and pending queues.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queued_ids.clear();
        self.queued_composite_types.clear();
        self.queued_variables.clear();
    }
}

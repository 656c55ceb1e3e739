//! The capability cache: `(from, to, mode) → ordered candidates`.
//!
//! ## Why a persisted cache?
//!
//! Negotiating with every converter means spawning each one twice. Doing that
//! on every request would dominate the cost of small conversions, so the
//! registry's view is flattened once into this table, written to disk, and
//! reloaded on later runs without renegotiation.
//!
//! ## Ordering invariant
//!
//! Every candidate list is sorted by weight descending, then converter id
//! ascending. All maps are `BTreeMap`s so the YAML form is deterministic:
//! rebuilding from an unchanged registry produces byte-identical output.
//!
//! ## Live copy
//!
//! At runtime the cache only shrinks: failed candidates are removed for one
//! pair ([`CapabilityCache::mark_failed`]) and unreachable converters are
//! removed everywhere ([`CapabilityCache::mark_globally_failed`]). The live
//! copy is shared behind [`SharedCache`] so concurrent requests see each
//! other's exclusions.

use crate::error::DocbridgeError;
use crate::format::{Format, QualityMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One candidate converter for a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub converter: String,
    pub weight: f64,
}

type Buckets = BTreeMap<QualityMode, Vec<CacheEntry>>;

/// Flattened view of every available converter's capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCache {
    #[serde(default)]
    conversions: BTreeMap<Format, BTreeMap<Format, Buckets>>,
}

fn sort_candidates(list: &mut [CacheEntry]) {
    list.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.converter.cmp(&b.converter))
    });
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate to a bucket, keeping the ordering invariant.
    /// Re-inserting an id already present replaces its weight.
    pub fn insert(
        &mut self,
        from: Format,
        to: Format,
        mode: QualityMode,
        converter: impl Into<String>,
        weight: f64,
    ) {
        let converter = converter.into();
        let list = self
            .conversions
            .entry(from)
            .or_default()
            .entry(to)
            .or_default()
            .entry(mode)
            .or_default();
        list.retain(|e| e.converter != converter);
        list.push(CacheEntry { converter, weight });
        sort_candidates(list);
    }

    /// Ordered candidates for exactly this bucket (no fallback).
    pub fn candidates(&self, from: &Format, to: &Format, mode: QualityMode) -> &[CacheEntry] {
        self.conversions
            .get(from)
            .and_then(|tos| tos.get(to))
            .and_then(|modes| modes.get(&mode))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Candidates for `mode`, falling back to `normal` when that bucket is
    /// empty. Returns the mode actually used, or `None` when neither bucket
    /// has a candidate.
    pub fn find_candidates(
        &self,
        from: &Format,
        to: &Format,
        mode: QualityMode,
    ) -> Option<(QualityMode, Vec<CacheEntry>)> {
        let requested = self.candidates(from, to, mode);
        if !requested.is_empty() {
            return Some((mode, requested.to_vec()));
        }
        if mode == QualityMode::Normal {
            return None;
        }
        let normal = self.candidates(from, to, QualityMode::Normal);
        if normal.is_empty() {
            return None;
        }
        debug!(%from, %to, requested = %mode, "No candidates for mode, falling back to normal");
        Some((QualityMode::Normal, normal.to_vec()))
    }

    /// `true` when any mode bucket for the pair has a candidate.
    pub fn has_direct(&self, from: &Format, to: &Format) -> bool {
        self.conversions
            .get(from)
            .and_then(|tos| tos.get(to))
            .is_some_and(|modes| modes.values().any(|list| !list.is_empty()))
    }

    /// Remove `converter` from every mode bucket of one pair. Idempotent.
    /// Returns `true` if anything was removed.
    pub fn mark_failed(&mut self, from: &Format, to: &Format, converter: &str) -> bool {
        let Some(modes) = self.conversions.get_mut(from).and_then(|tos| tos.get_mut(to)) else {
            return false;
        };
        let mut removed = false;
        for list in modes.values_mut() {
            let before = list.len();
            list.retain(|e| e.converter != converter);
            removed |= list.len() != before;
        }
        if removed {
            debug!(%from, %to, converter, "Excluded failed candidate for pair");
        }
        removed
    }

    /// Remove `converter` from every bucket. Returns the number of buckets
    /// touched.
    pub fn mark_globally_failed(&mut self, converter: &str) -> usize {
        let mut touched = 0;
        for tos in self.conversions.values_mut() {
            for modes in tos.values_mut() {
                for list in modes.values_mut() {
                    let before = list.len();
                    list.retain(|e| e.converter != converter);
                    if list.len() != before {
                        touched += 1;
                    }
                }
            }
        }
        if touched > 0 {
            debug!(converter, buckets = touched, "Excluded converter everywhere");
        }
        touched
    }

    /// Every converter id referenced by any bucket, sorted.
    pub fn converter_ids(&self) -> BTreeSet<String> {
        self.conversions
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .flatten()
            .map(|e| e.converter.clone())
            .collect()
    }

    /// Every `(from, to)` pair with a non-empty `normal` bucket. These are
    /// the edges of the format graph.
    pub fn edges(&self) -> impl Iterator<Item = (&Format, &Format)> {
        self.conversions.iter().flat_map(|(from, tos)| {
            tos.iter()
                .filter(|(_, modes)| {
                    modes
                        .get(&QualityMode::Normal)
                        .is_some_and(|list| !list.is_empty())
                })
                .map(move |(to, _)| (from, to))
        })
    }

    /// Formats that at least one converter accepts as input.
    pub fn supported_input_formats(&self) -> BTreeSet<Format> {
        self.edges().map(|(from, _)| from.clone()).collect()
    }

    /// Formats that at least one converter produces.
    pub fn supported_output_formats(&self) -> BTreeSet<Format> {
        self.edges().map(|(_, to)| to.clone()).collect()
    }

    /// Number of direct pairs with at least one `normal` candidate.
    pub fn conversion_count(&self) -> usize {
        self.edges().count()
    }

    pub fn is_empty(&self) -> bool {
        self.conversion_count() == 0
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parse a persisted cache, re-establishing the ordering invariant in
    /// case the file was edited by hand.
    pub fn from_yaml(body: &str) -> Result<Self, serde_yaml::Error> {
        let mut cache: CapabilityCache = serde_yaml::from_str(body)?;
        for tos in cache.conversions.values_mut() {
            for modes in tos.values_mut() {
                for list in modes.values_mut() {
                    sort_candidates(list);
                }
            }
        }
        Ok(cache)
    }

    /// Write the cache atomically: a sibling temp file renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), DocbridgeError> {
        let body = self.to_yaml().map_err(|e| DocbridgeError::CacheParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let io_err = |source| DocbridgeError::CacheIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, body.as_bytes()).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        info!(
            path = %path.display(),
            conversions = self.conversion_count(),
            "Capability cache written"
        );
        Ok(())
    }

    /// Read a persisted cache. A missing file is reported as
    /// [`DocbridgeError::CacheIo`] with `NotFound`.
    pub fn load(path: &Path) -> Result<Self, DocbridgeError> {
        let body = std::fs::read_to_string(path).map_err(|source| DocbridgeError::CacheIo {
            path: path.to_path_buf(),
            source,
        })?;
        let cache = Self::from_yaml(&body).map_err(|e| DocbridgeError::CacheParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        debug!(
            path = %path.display(),
            conversions = cache.conversion_count(),
            "Capability cache loaded"
        );
        Ok(cache)
    }
}

/// Lock-protected live cache shared by the fallback executor and resolver.
///
/// Every operation takes the lock for its own duration only; nothing holds it
/// across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedCache(Arc<Mutex<CapabilityCache>>);

impl SharedCache {
    pub fn new(cache: CapabilityCache) -> Self {
        Self(Arc::new(Mutex::new(cache)))
    }

    /// Point-in-time copy, used to build the format graph.
    pub fn snapshot(&self) -> CapabilityCache {
        self.0.lock().clone()
    }

    pub fn find_candidates(
        &self,
        from: &Format,
        to: &Format,
        mode: QualityMode,
    ) -> Option<(QualityMode, Vec<CacheEntry>)> {
        self.0.lock().find_candidates(from, to, mode)
    }

    pub fn has_direct(&self, from: &Format, to: &Format) -> bool {
        self.0.lock().has_direct(from, to)
    }

    /// `true` while `converter` is still a candidate in the given bucket.
    /// Another request may have excluded it since the candidate list was
    /// snapshotted.
    pub fn still_eligible(
        &self,
        from: &Format,
        to: &Format,
        mode: QualityMode,
        converter: &str,
    ) -> bool {
        self.0
            .lock()
            .candidates(from, to, mode)
            .iter()
            .any(|e| e.converter == converter)
    }

    pub fn mark_failed(&self, from: &Format, to: &Format, converter: &str) -> bool {
        self.0.lock().mark_failed(from, to, converter)
    }

    pub fn mark_globally_failed(&self, converter: &str) -> usize {
        self.0.lock().mark_globally_failed(converter)
    }
}

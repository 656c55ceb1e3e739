//! The converter registry: which converters exist, how much to trust each,
//! and what each one said it can do.
//!
//! ## Lifecycle
//!
//! 1. [`ConverterRegistry::register`] adds an entry, unavailable.
//! 2. [`ConverterRegistry::initialize`] negotiates with every entry
//!    concurrently: `ping`, then `describe`. An entry becomes available only
//!    when both succeed. Failures are logged and the entry is skipped.
//! 3. [`ConverterRegistry::build_cache`] flattens the available entries into
//!    a [`CapabilityCache`].
//!
//! Descriptors are immutable once negotiated; re-running `initialize`
//! replaces them wholesale.

use crate::cache::CapabilityCache;
use crate::capability::CapabilityDescriptor;
use crate::converter::ConverterHandle;
use crate::error::{DocbridgeError, NegotiationError};
use crate::format::QualityMode;
use futures::future::join_all;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One registered converter and its negotiation state.
#[derive(Clone)]
pub struct RegistryEntry {
    pub converter: ConverterHandle,
    /// Trust in `[0, 1]`; higher is tried first.
    pub weight: f64,
    pub available: bool,
    pub descriptor: Option<CapabilityDescriptor>,
    /// Why the last negotiation excluded this entry.
    pub last_error: Option<String>,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.converter.id())
            .field("weight", &self.weight)
            .field("available", &self.available)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Outcome of one [`ConverterRegistry::initialize`] run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitSummary {
    pub available: Vec<String>,
    /// `(id, reason)` for every excluded converter.
    pub unavailable: Vec<(String, String)>,
}

#[derive(Default)]
pub struct ConverterRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a converter. The weight is clamped into `[0, 1]`; registering the
    /// same id again replaces the earlier entry.
    pub fn register(&mut self, converter: ConverterHandle, weight: f64) -> Result<(), DocbridgeError> {
        if !weight.is_finite() {
            return Err(DocbridgeError::InvalidConfig(format!(
                "weight for converter '{}' must be a finite number, got {weight}",
                converter.id()
            )));
        }
        let id = converter.id().to_string();
        let weight = weight.clamp(0.0, 1.0);
        if self.entries.contains_key(&id) {
            warn!(converter = %id, "Converter registered twice, replacing earlier entry");
        }
        debug!(converter = %id, weight, "Registered converter");
        self.entries.insert(
            id,
            RegistryEntry {
                converter,
                weight,
                available: false,
                descriptor: None,
                last_error: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ConverterHandle> {
        self.entries.get(id).map(|e| e.converter.clone())
    }

    pub fn entry(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// Entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Negotiate with every registered converter. Idempotent: each run
    /// starts from scratch and overwrites the previous outcome.
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> InitSummary {
        let negotiations = self.entries.values().map(|entry| {
            let converter = entry.converter.clone();
            async move {
                let id = converter.id().to_string();
                let outcome = negotiate(&converter, cancel).await;
                (id, outcome)
            }
        });
        let results = join_all(negotiations).await;

        let mut summary = InitSummary::default();
        for (id, outcome) in results {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            match outcome {
                Ok(descriptor) => {
                    info!(
                        converter = %id,
                        name = %descriptor.display_name,
                        pairs = descriptor.pair_count(),
                        weight = entry.weight,
                        "Converter available"
                    );
                    entry.available = true;
                    entry.descriptor = Some(descriptor);
                    entry.last_error = None;
                    summary.available.push(id);
                }
                Err(e) => {
                    if e.is_transient() {
                        info!(converter = %id, "Converter temporarily unavailable, skipping");
                    } else {
                        warn!(converter = %id, "Converter excluded: {}", e);
                    }
                    entry.available = false;
                    entry.descriptor = None;
                    entry.last_error = Some(e.to_string());
                    summary.unavailable.push((id, e.to_string()));
                }
            }
        }
        summary
    }

    /// Flatten every available entry's capabilities into a cache.
    pub fn build_cache(&self) -> CapabilityCache {
        let mut cache = CapabilityCache::new();
        for entry in self.entries.values().filter(|e| e.available) {
            let Some(descriptor) = &entry.descriptor else {
                continue;
            };
            for (from, to, pair) in descriptor.pairs() {
                for mode in QualityMode::ALL {
                    if pair.modes.supports(mode) {
                        cache.insert(
                            from.clone(),
                            to.clone(),
                            mode,
                            entry.converter.id(),
                            entry.weight,
                        );
                    }
                }
            }
        }
        cache
    }

    /// Ping the given converters concurrently. Ids that are not registered
    /// answer `false`.
    pub async fn ping_many<I>(&self, ids: I, cancel: &CancellationToken) -> Vec<(String, bool)>
    where
        I: IntoIterator<Item = String>,
    {
        let pings = ids.into_iter().map(|id| {
            let converter = self.get(&id);
            async move {
                let ok = match converter {
                    Some(c) => c.ping(cancel).await,
                    None => false,
                };
                (id, ok)
            }
        });
        join_all(pings).await
    }
}

async fn negotiate(
    converter: &ConverterHandle,
    cancel: &CancellationToken,
) -> Result<CapabilityDescriptor, NegotiationError> {
    if !converter.ping(cancel).await {
        return Err(NegotiationError::PingFailed {
            converter: converter.id().to_string(),
            detail: "no pong".to_string(),
        });
    }
    let mut descriptor = converter.describe(cancel).await?;
    descriptor.converter_id = converter.id().to_string();
    descriptor.validate()?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fmt, MockConverter};

    fn ids(list: &[crate::cache::CacheEntry]) -> Vec<&str> {
        list.iter().map(|e| e.converter.as_str()).collect()
    }

    #[test]
    fn weights_are_clamped_and_nan_rejected() {
        let mut r = ConverterRegistry::new();
        r.register(MockConverter::new("hi").handle(), 7.0).unwrap();
        r.register(MockConverter::new("lo").handle(), -1.0).unwrap();
        assert_eq!(r.entry("hi").unwrap().weight, 1.0);
        assert_eq!(r.entry("lo").unwrap().weight, 0.0);
        assert!(matches!(
            r.register(MockConverter::new("bad").handle(), f64::NAN),
            Err(DocbridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn duplicate_id_replaces() {
        let mut r = ConverterRegistry::new();
        r.register(MockConverter::new("x").handle(), 0.3).unwrap();
        r.register(MockConverter::new("x").handle(), 0.6).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.entry("x").unwrap().weight, 0.6);
    }

    #[tokio::test]
    async fn initialize_marks_availability() {
        let mut r = ConverterRegistry::new();
        r.register(MockConverter::new("ok").pair("md", "html").handle(), 0.5)
            .unwrap();
        r.register(MockConverter::new("down").pair("md", "html").offline().handle(), 0.9)
            .unwrap();
        r.register(MockConverter::new("busy").pair("md", "html").idle().handle(), 0.9)
            .unwrap();
        r.register(MockConverter::new("empty").handle(), 0.9).unwrap();

        let summary = r.initialize(&CancellationToken::new()).await;
        assert_eq!(summary.available, ["ok"]);
        let excluded: Vec<_> = summary.unavailable.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(excluded, ["busy", "down", "empty"]);
        assert!(r.entry("ok").unwrap().available);
        assert!(r.entry("empty").unwrap().last_error.is_some());

        // Unavailable entries never reach the cache.
        let cache = r.build_cache();
        assert_eq!(cache.converter_ids().into_iter().collect::<Vec<_>>(), ["ok"]);
    }

    #[tokio::test]
    async fn cache_buckets_follow_modes_and_weights() {
        let mut r = ConverterRegistry::new();
        r.register(
            MockConverter::new("pandoc")
                .pair_with_modes("md", "html", &[QualityMode::Fast])
                .handle(),
            0.9,
        )
        .unwrap();
        r.register(MockConverter::new("basic").pair("md", "html").handle(), 0.4)
            .unwrap();
        r.register(MockConverter::new("alt").pair("md", "html").handle(), 0.4)
            .unwrap();
        r.initialize(&CancellationToken::new()).await;

        let cache = r.build_cache();
        let (md, html) = (fmt("md"), fmt("html"));
        assert_eq!(
            ids(cache.candidates(&md, &html, QualityMode::Normal)),
            ["pandoc", "alt", "basic"]
        );
        assert_eq!(ids(cache.candidates(&md, &html, QualityMode::Fast)), ["pandoc"]);
        assert!(cache.candidates(&md, &html, QualityMode::Quality).is_empty());
    }

    #[tokio::test]
    async fn rebuild_is_byte_identical() {
        let mut r = ConverterRegistry::new();
        r.register(MockConverter::new("a").pair("djvu", "ps").handle(), 0.5)
            .unwrap();
        r.register(MockConverter::new("b").pair("ps", "html").handle(), 0.5)
            .unwrap();
        r.initialize(&CancellationToken::new()).await;
        let first = r.build_cache().to_yaml().unwrap();
        r.initialize(&CancellationToken::new()).await;
        let second = r.build_cache().to_yaml().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn ping_many_reports_unknown_ids() {
        let mut r = ConverterRegistry::new();
        r.register(MockConverter::new("up").handle(), 0.5).unwrap();
        r.register(MockConverter::new("down").offline().handle(), 0.5)
            .unwrap();
        let results = r
            .ping_many(
                ["up".to_string(), "down".to_string(), "ghost".to_string()],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(
            results,
            [
                ("up".to_string(), true),
                ("down".to_string(), false),
                ("ghost".to_string(), false)
            ]
        );
    }
}

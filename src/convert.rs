//! The conversion engine: the request state machine plus the cache
//! rebuild/load entry points.
//!
//! ## Request flow
//!
//! ```text
//! validate input ──▶ direct lookup ──(found)──────────────▶ fallback ──▶ done
//!                         │
//!                         └─(none)──▶ BFS ──(found)──▶ chain ──▶ done
//!                                       └─(none)──▶ UnsupportedConversion
//! ```
//!
//! There is no retry across these states: once a route is chosen, its
//! failure is the request's failure.
//!
//! ## Why can the engine open without a cache file?
//!
//! A fresh install has no cache yet. Rather than refusing to run, the engine
//! negotiates in memory for that process and logs a hint to persist the
//! result with `rebuild-cache`.

use crate::cache::{CapabilityCache, SharedCache};
use crate::config::EngineConfig;
use crate::error::DocbridgeError;
use crate::fallback::FallbackExecutor;
use crate::format::{Format, QualityMode};
use crate::input::{resolve_request, ResolvedRequest};
use crate::output::{CacheReport, ConversionReport, FormatMatrix};
use crate::pipeline::{FormatGraph, PipelineExecutor, PipelineResolver, PipelineStep};
use crate::registry::ConverterRegistry;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Source format; detected from the input extension when `None`.
    pub from: Option<Format>,
    /// Target format; detected from the output extension when `None`.
    pub to: Option<Format>,
    pub mode: QualityMode,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            from: None,
            to: None,
            mode: QualityMode::Normal,
        }
    }

    pub fn from_format(mut self, f: Format) -> Self {
        self.from = Some(f);
        self
    }

    pub fn to_format(mut self, f: Format) -> Self {
        self.to = Some(f);
        self
    }

    pub fn mode(mut self, mode: QualityMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Registry, live cache and configuration bound together.
///
/// `Engine` is cheap to clone and safe to share: concurrent requests see
/// each other's candidate exclusions through the shared cache.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ConverterRegistry>,
    cache: SharedCache,
    config: EngineConfig,
}

impl Engine {
    /// Bind an already-built cache without negotiating.
    pub fn new(registry: ConverterRegistry, cache: CapabilityCache, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            cache: SharedCache::new(cache),
            config,
        }
    }

    /// Negotiate with every registered converter and build the cache in
    /// memory.
    pub async fn negotiate(
        mut registry: ConverterRegistry,
        config: EngineConfig,
        cancel: &CancellationToken,
    ) -> (Self, CacheReport) {
        let summary = registry.initialize(cancel).await;
        let cache = registry.build_cache();
        let report = CacheReport {
            path: None,
            available: summary.available,
            unavailable: summary.unavailable,
            conversions: cache.conversion_count(),
        };
        (Self::new(registry, cache, config), report)
    }

    /// Negotiate, build the cache, and persist it to `config.cache_path`.
    pub async fn rebuild_cache(
        registry: ConverterRegistry,
        config: EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<(Self, CacheReport), DocbridgeError> {
        info!(converters = registry.len(), "Rebuilding capability cache");
        let (engine, mut report) = Self::negotiate(registry, config, cancel).await;
        if cancel.is_cancelled() {
            return Err(DocbridgeError::Cancelled);
        }
        let path = engine.config.cache_path.clone();
        engine.cache.snapshot().save(&path)?;
        report.path = Some(path);
        Ok((engine, report))
    }

    /// Load the persisted cache, or negotiate in memory when there is none.
    ///
    /// With `verify_on_load`, every converter the cache references is pinged
    /// and the silent ones are excluded from every bucket.
    pub async fn open(
        registry: ConverterRegistry,
        config: EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, DocbridgeError> {
        let cache = match CapabilityCache::load(&config.cache_path) {
            Ok(cache) => cache,
            Err(DocbridgeError::CacheIo { source, path })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(
                    path = %path.display(),
                    "No capability cache found, negotiating for this run only. \
                     Run `docbridge rebuild-cache` to persist it"
                );
                let (engine, _) = Self::negotiate(registry, config, cancel).await;
                return Ok(engine);
            }
            Err(e) => return Err(e),
        };

        let engine = Self::new(registry, cache, config);
        if engine.config.verify_on_load {
            engine.verify(cancel).await;
        }
        Ok(engine)
    }

    /// Ping every converter referenced by the live cache; exclude the ones
    /// that fail. Returns the excluded ids.
    pub async fn verify(&self, cancel: &CancellationToken) -> Vec<String> {
        let ids = self.cache.snapshot().converter_ids();
        let total = ids.len();
        let results = self.registry.ping_many(ids, cancel).await;

        let mut excluded = Vec::new();
        for (id, ok) in results {
            if ok {
                continue;
            }
            if self.registry.get(&id).is_none() {
                warn!(converter = %id, "Cached converter is not configured, excluding");
            } else {
                warn!(converter = %id, "Cached converter did not answer ping, excluding");
            }
            self.cache.mark_globally_failed(&id);
            excluded.push(id);
        }
        if total > 0 && excluded.len() == total {
            warn!("No cached converter responded; only conversions without converters are possible");
        }
        debug!(checked = total, excluded = excluded.len(), "Verified cached converters");
        excluded
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn supported_input_formats(&self) -> BTreeSet<Format> {
        self.cache.snapshot().supported_input_formats()
    }

    pub fn supported_output_formats(&self) -> BTreeSet<Format> {
        self.cache.snapshot().supported_output_formats()
    }

    pub fn format_matrix(&self) -> FormatMatrix {
        FormatMatrix::from_cache(&self.cache.snapshot())
    }

    /// Choose the route for `from → to` without running it.
    ///
    /// A pair with candidates in `mode` (or `normal`) is a one-step route.
    /// A pair with no bucket in any mode goes to the BFS resolver.
    pub fn plan(
        &self,
        from: &Format,
        to: &Format,
        mode: QualityMode,
    ) -> Result<Vec<PipelineStep>, DocbridgeError> {
        if let Some((_, candidates)) = self.cache.find_candidates(from, to, mode) {
            if let Some(top) = candidates.first() {
                debug!(%from, %to, converter = %top.converter, "Direct conversion available");
                return Ok(vec![PipelineStep {
                    from: from.clone(),
                    to: to.clone(),
                    converter: top.converter.clone(),
                }]);
            }
        }
        if self.cache.has_direct(from, to) {
            return Err(DocbridgeError::UnsupportedConversion {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let graph = FormatGraph::from_cache(&self.cache.snapshot());
        debug!(%from, %to, edges = graph.edge_count(), "No direct converter, searching for a chain");
        PipelineResolver::new(self.config.intermediate_priority.clone(), self.config.max_hops)
            .resolve(&graph, from, to)
    }

    /// Convert one document.
    ///
    /// # Errors
    /// * [`DocbridgeError::InvalidInput`] — bad input path or undetectable
    ///   format; no converter was invoked.
    /// * [`DocbridgeError::UnsupportedConversion`] — no direct converter and
    ///   no chain.
    /// * [`DocbridgeError::ConversionFailed`] — every candidate of a hop
    ///   failed. No output file is left behind.
    /// * [`DocbridgeError::Cancelled`] — `cancel` fired.
    pub async fn convert(
        &self,
        request: ConversionRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, DocbridgeError> {
        let start = Instant::now();
        let progress = self.config.progress_callback.clone();
        let (resolved, steps) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Some(cb) = &progress {
                    cb.on_conversion_complete(false);
                }
                return Err(e);
            }
        };

        if let Some(cb) = &progress {
            cb.on_conversion_start(steps.len());
        }

        let fallback = FallbackExecutor::new(self.cache.clone(), Arc::clone(&self.registry))
            .with_progress(progress.clone());
        let executor = PipelineExecutor::new(fallback)
            .with_staging_dir(self.config.staging_dir.clone())
            .with_progress(progress.clone());
        let result = executor
            .run(&steps, &resolved.input, &resolved.output, request.mode, cancel)
            .await;

        if let Some(cb) = &progress {
            cb.on_conversion_complete(result.is_ok());
        }
        let completed = result?;

        let output_bytes = tokio::fs::metadata(&resolved.output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            from = %resolved.from,
            to = %resolved.to,
            hops = completed.len(),
            bytes = output_bytes,
            "Conversion complete in {}ms",
            duration_ms
        );

        Ok(ConversionReport {
            input: resolved.input,
            output: resolved.output,
            from: resolved.from,
            to: resolved.to,
            mode: request.mode,
            steps: completed,
            output_bytes,
            duration_ms,
        })
    }

    /// Validate the request and choose its route.
    fn prepare(
        &self,
        request: &ConversionRequest,
    ) -> Result<(ResolvedRequest, Vec<PipelineStep>), DocbridgeError> {
        let resolved = resolve_request(
            &request.input,
            &request.output,
            request.from.clone(),
            request.to.clone(),
        )?;
        info!(
            "Starting conversion: {} ({}) → {} ({})",
            resolved.input.display(),
            resolved.from,
            resolved.output.display(),
            resolved.to
        );

        let steps = self.plan(&resolved.from, &resolved.to, request.mode)?;
        if steps.len() > 1 {
            let route: Vec<&str> = std::iter::once(steps[0].from.as_str())
                .chain(steps.iter().map(|s| s.to.as_str()))
                .collect();
            info!(route = %route.join(" → "), "Using conversion chain");
        }
        Ok((resolved, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ConversionProgressCallback, ProgressCallback};
    use crate::testing::{fmt, CallLog, MockConverter};
    use parking_lot::Mutex;
    use std::path::Path;

    fn registry(converters: Vec<(MockConverter, f64)>) -> ConverterRegistry {
        let mut r = ConverterRegistry::new();
        for (c, w) in converters {
            r.register(c.handle(), w).unwrap();
        }
        r
    }

    fn config(dir: &Path) -> EngineConfig {
        EngineConfig::builder()
            .cache_path(dir.join("converters.yaml"))
            .staging_dir(dir)
            .build()
            .unwrap()
    }

    fn write(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, "source").unwrap();
        p
    }

    #[tokio::test]
    async fn direct_conversion_reports_one_step() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, report) = Engine::negotiate(
            registry(vec![(MockConverter::new("pandoc").pair("md", "html"), 0.9)]),
            config(dir.path()),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(report.available, ["pandoc"]);

        let input = write(dir.path(), "a.md");
        let report = engine
            .convert(
                ConversionRequest::new(&input, dir.path().join("a.html")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].converter, "pandoc");
        assert!(report.output_bytes > 0);
    }

    #[tokio::test]
    async fn djvu_to_html_goes_through_ps() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();
        let cfg = EngineConfig::builder()
            .cache_path(dir.path().join("converters.yaml"))
            .staging_dir(&staging)
            .build()
            .unwrap();
        let (engine, _) = Engine::negotiate(
            registry(vec![
                (MockConverter::new("ddjvu").pair("djvu", "ps"), 0.5),
                (MockConverter::new("gs").pair("ps", "html"), 0.5),
            ]),
            cfg,
            &CancellationToken::new(),
        )
        .await;

        let input = write(dir.path(), "book.djvu");
        let output = dir.path().join("book.html");
        let report = engine
            .convert(ConversionRequest::new(&input, &output), &CancellationToken::new())
            .await
            .unwrap();
        let route: Vec<_> = report.steps.iter().map(|s| s.to.as_str()).collect();
        assert_eq!(route, ["ps", "html"]);
        assert!(output.exists());
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_pair_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Engine::negotiate(
            registry(vec![(MockConverter::new("x").pair("md", "html"), 0.5)]),
            config(dir.path()),
            &CancellationToken::new(),
        )
        .await;
        let input = write(dir.path(), "a.docx");
        let err = engine
            .convert(
                ConversionRequest::new(&input, dir.path().join("a.epub")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(&err, DocbridgeError::UnsupportedConversion { from, to }
                if from.as_str() == "docx" && to.as_str() == "epub"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn exhaustion_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = Engine::negotiate(
            registry(vec![
                (MockConverter::new("a").pair("md", "pdf").failing("md", "pdf"), 0.9),
                (MockConverter::new("b").pair("md", "pdf").failing("md", "pdf"), 0.5),
            ]),
            config(dir.path()),
            &CancellationToken::new(),
        )
        .await;
        let input = write(dir.path(), "a.md");
        let output = dir.path().join("a.pdf");
        let err = engine
            .convert(ConversionRequest::new(&input, &output), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("md → pdf"), "{err}");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn invalid_input_invokes_no_converter() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::default();
        let (engine, _) = Engine::negotiate(
            registry(vec![(MockConverter::new("x").pair("md", "html").with_log(&log), 0.5)]),
            config(dir.path()),
            &CancellationToken::new(),
        )
        .await;
        let err = engine
            .convert(
                ConversionRequest::new(dir.path().join("missing.md"), dir.path().join("a.html")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocbridgeError::InvalidInput { .. }));
        assert!(log.lock().is_empty());
        // The converter was not penalised.
        assert!(engine
            .cache()
            .still_eligible(&fmt("md"), &fmt("html"), QualityMode::Normal, "x"));
    }

    #[tokio::test]
    async fn rebuild_then_open_preserves_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let make = || {
            registry(vec![
                (MockConverter::new("b").pair("md", "html"), 0.5),
                (MockConverter::new("a").pair("md", "html"), 0.5),
                (MockConverter::new("top").pair("md", "html"), 0.9),
            ])
        };
        let cancel = CancellationToken::new();
        let (built, report) = Engine::rebuild_cache(make(), config(dir.path()), &cancel)
            .await
            .unwrap();
        assert_eq!(report.conversions, 1);
        let first = std::fs::read_to_string(dir.path().join("converters.yaml")).unwrap();

        Engine::rebuild_cache(make(), config(dir.path()), &cancel)
            .await
            .unwrap();
        let second = std::fs::read_to_string(dir.path().join("converters.yaml")).unwrap();
        assert_eq!(first, second);

        let opened = Engine::open(make(), config(dir.path()), &cancel).await.unwrap();
        assert_eq!(opened.cache().snapshot(), built.cache().snapshot());
    }

    #[tokio::test]
    async fn open_excludes_converters_that_stop_answering() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        Engine::rebuild_cache(
            registry(vec![
                (MockConverter::new("alive").pair("md", "html"), 0.5),
                (MockConverter::new("gone").pair("md", "html").pair("md", "pdf"), 0.9),
            ]),
            config(dir.path()),
            &cancel,
        )
        .await
        .unwrap();

        let engine = Engine::open(
            registry(vec![
                (MockConverter::new("alive").pair("md", "html"), 0.5),
                (MockConverter::new("gone").offline(), 0.9),
            ]),
            config(dir.path()),
            &cancel,
        )
        .await
        .unwrap();
        let ids = engine.cache().snapshot().converter_ids();
        assert!(ids.contains("alive"));
        assert!(!ids.contains("gone"));
        assert!(!engine.cache().has_direct(&fmt("md"), &fmt("pdf")));
    }

    #[tokio::test]
    async fn open_without_cache_negotiates_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(
            registry(vec![(MockConverter::new("x").pair("md", "html"), 0.5)]),
            config(dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(engine.cache().has_direct(&fmt("md"), &fmt("html")));
        assert!(!dir.path().join("converters.yaml").exists());
    }

    #[tokio::test]
    async fn malformed_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("converters.yaml"), "conversions: [1, 2").unwrap();
        let err = Engine::open(registry(vec![]), config(dir.path()), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DocbridgeError::CacheParse { .. }), "{err}");
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl ConversionProgressCallback for Events {
        fn on_conversion_start(&self, total_steps: usize) {
            self.0.lock().push(format!("start {total_steps}"));
        }
        fn on_step_start(&self, step: usize, total: usize, from: &Format, to: &Format) {
            self.0.lock().push(format!("step {step}/{total} {from}->{to}"));
        }
        fn on_candidate_failed(&self, step: usize, converter: &str, _error: &str) {
            self.0.lock().push(format!("failed {step} {converter}"));
        }
        fn on_step_complete(&self, step: usize, _total: usize, converter: &str) {
            self.0.lock().push(format!("done {step} {converter}"));
        }
        fn on_conversion_complete(&self, success: bool) {
            self.0.lock().push(format!("complete {success}"));
        }
    }

    #[tokio::test]
    async fn progress_events_follow_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Events::default());
        let cfg = EngineConfig::builder()
            .cache_path(dir.path().join("converters.yaml"))
            .staging_dir(dir.path())
            .progress_callback(events.clone() as ProgressCallback)
            .build()
            .unwrap();
        let (engine, _) = Engine::negotiate(
            registry(vec![
                (MockConverter::new("a").pair("djvu", "ps"), 0.5),
                (MockConverter::new("bad").pair("ps", "html").failing("ps", "html"), 0.9),
                (MockConverter::new("good").pair("ps", "html"), 0.1),
            ]),
            cfg,
            &CancellationToken::new(),
        )
        .await;
        let input = write(dir.path(), "x.djvu");
        engine
            .convert(
                ConversionRequest::new(&input, dir.path().join("x.html")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            *events.0.lock(),
            [
                "start 2",
                "step 1/2 djvu->ps",
                "done 1 a",
                "step 2/2 ps->html",
                "failed 2 bad",
                "done 2 good",
                "complete true",
            ]
        );
    }

    #[tokio::test]
    async fn progress_completes_when_no_route_exists() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Events::default());
        let cfg = EngineConfig::builder()
            .cache_path(dir.path().join("converters.yaml"))
            .progress_callback(events.clone() as ProgressCallback)
            .build()
            .unwrap();
        let (engine, _) = Engine::negotiate(
            registry(vec![(MockConverter::new("a").pair("md", "html"), 0.5)]),
            cfg,
            &CancellationToken::new(),
        )
        .await;
        let input = write(dir.path(), "x.djvu");
        let err = engine
            .convert(
                ConversionRequest::new(&input, dir.path().join("x.epub")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocbridgeError::UnsupportedConversion { .. }), "{err}");
        assert_eq!(*events.0.lock(), ["complete false"]);
    }
}

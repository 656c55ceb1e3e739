//! # docbridge
//!
//! Convert documents between formats through an open-ended set of pluggable
//! converters, chaining them when no single converter can do the job.
//!
//! ## Why this crate?
//!
//! Document tooling is fragmented: pandoc handles markup, LibreOffice handles
//! office formats, DjVuLibre and Ghostscript handle scanned and print formats,
//! and none of them covers everything. docbridge asks each converter what it
//! can do, ranks them by trust, falls back when one fails, and when no direct
//! converter exists finds a short chain through intermediate formats.
//!
//! ## Architecture
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Input       validate the source, detect formats from extensions
//!  ├─ 2. Lookup      capability cache: (from, to, mode) → ranked candidates
//!  ├─ 3. Resolve     BFS over the format graph when there is no direct pair
//!  ├─ 4. Execute     per hop: weighted fallback across candidates
//!  └─ 5. Clean up    staging directory removed; report timing and size
//! ```
//!
//! The capability cache is produced by negotiating with every registered
//! converter (`ping`, then `describe`) and persisted as YAML so later runs
//! skip negotiation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbridge::{ConversionRequest, Engine, EngineConfig, SettingsFile};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (settings, _) = SettingsFile::load_or_default(None)?;
//!     let config = settings.apply(EngineConfig::builder())?.build()?;
//!     let registry = settings.build_registry(&config)?;
//!
//!     let cancel = CancellationToken::new();
//!     let engine = Engine::open(registry, config, &cancel).await?;
//!     let report = engine
//!         .convert(ConversionRequest::new("book.djvu", "book.html"), &cancel)
//!         .await?;
//!     eprintln!("{} hop(s), {} bytes", report.steps.len(), report.output_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbridge` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docbridge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod builtin;
pub mod cache;
pub mod capability;
pub mod config;
pub mod convert;
pub mod converter;
pub mod error;
pub mod fallback;
pub mod format;
pub mod input;
pub mod negotiation;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheEntry, CapabilityCache, SharedCache};
pub use capability::{CapabilityDescriptor, Metric, Modes};
pub use config::{EngineConfig, EngineConfigBuilder, SettingsFile};
pub use convert::{ConversionRequest, Engine};
pub use converter::{ConversionJob, Converter, ConverterHandle};
pub use error::{ConverterError, DocbridgeError, NegotiationError, StepFailure};
pub use format::{Format, QualityMode};
pub use negotiation::ExternalConverter;
pub use output::{CacheReport, ConversionReport, FormatMatrix};
pub use pipeline::{CompletedStep, PipelineStep};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::{ConverterRegistry, InitSummary};

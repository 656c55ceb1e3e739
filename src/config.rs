//! Configuration for the conversion engine.
//!
//! Two layers:
//!
//! * [`EngineConfig`] — runtime knobs (timeouts, search limits, paths), built
//!   via [`EngineConfigBuilder`] which validates on [`build`](EngineConfigBuilder::build).
//! * [`SettingsFile`] — the on-disk TOML document listing which external
//!   converters exist and how much to trust each one. It feeds the builder
//!   and the [`ConverterRegistry`].
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on documented defaults for
//! the rest; adding a field never breaks existing call sites.

use crate::builtin::{PlaintextConverter, PLAINTEXT_WEIGHT};
use crate::error::DocbridgeError;
use crate::format::Format;
use crate::negotiation::command::{DEFAULT_CONTROL_TIMEOUT, DEFAULT_CONVERT_TIMEOUT};
use crate::negotiation::ExternalConverter;
use crate::pipeline::resolver::{DEFAULT_INTERMEDIATES, DEFAULT_MAX_HOPS};
use crate::progress::ProgressCallback;
use crate::registry::ConverterRegistry;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default capability cache file name.
pub const DEFAULT_CACHE_FILE: &str = "converters.yaml";

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "docbridge.toml";

/// Upper bound accepted for `max_hops`.
pub const MAX_HOPS_LIMIT: usize = 16;

/// Runtime configuration for an [`crate::Engine`].
///
/// # Example
/// ```rust
/// use docbridge::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::builder()
///     .convert_timeout(Duration::from_secs(60))
///     .max_hops(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Timeout for `ping` and `describe`. Default: 10 s.
    pub control_timeout: Duration,

    /// Timeout for one `convert` call. Default: 300 s.
    ///
    /// Large office documents routinely take minutes through LibreOffice or
    /// Calibre; the control timeout would kill them.
    pub convert_timeout: Duration,

    /// Maximum hops in a resolved chain. Range: 1–16. Default: 4.
    pub max_hops: usize,

    /// Intermediates preferred when several chains are equally short,
    /// most preferred first. Default: `pdf`, `ps`, `html`.
    pub intermediate_priority: Vec<Format>,

    /// Where the capability cache is read from and written to.
    pub cache_path: PathBuf,

    /// Ping every converter referenced by a loaded cache and exclude the
    /// ones that do not answer. Default: true.
    pub verify_on_load: bool,

    /// Parent directory for per-request staging directories. Default: the
    /// system temp directory.
    pub staging_dir: Option<PathBuf>,

    /// Receives per-hop progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            convert_timeout: DEFAULT_CONVERT_TIMEOUT,
            max_hops: DEFAULT_MAX_HOPS,
            intermediate_priority: DEFAULT_INTERMEDIATES
                .iter()
                .filter_map(|f| Format::new(f).ok())
                .collect(),
            cache_path: PathBuf::from(DEFAULT_CACHE_FILE),
            verify_on_load: true,
            staging_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("control_timeout", &self.control_timeout)
            .field("convert_timeout", &self.convert_timeout)
            .field("max_hops", &self.max_hops)
            .field("intermediate_priority", &self.intermediate_priority)
            .field("cache_path", &self.cache_path)
            .field("verify_on_load", &self.verify_on_load)
            .field("staging_dir", &self.staging_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn control_timeout(mut self, d: Duration) -> Self {
        self.config.control_timeout = d;
        self
    }

    pub fn convert_timeout(mut self, d: Duration) -> Self {
        self.config.convert_timeout = d;
        self
    }

    pub fn max_hops(mut self, n: usize) -> Self {
        self.config.max_hops = n;
        self
    }

    pub fn intermediate_priority(mut self, formats: Vec<Format>) -> Self {
        self.config.intermediate_priority = formats;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = path.into();
        self
    }

    pub fn verify_on_load(mut self, v: bool) -> Self {
        self.config.verify_on_load = v;
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, DocbridgeError> {
        let c = &self.config;
        if c.max_hops == 0 || c.max_hops > MAX_HOPS_LIMIT {
            return Err(DocbridgeError::InvalidConfig(format!(
                "max_hops must be 1–{MAX_HOPS_LIMIT}, got {}",
                c.max_hops
            )));
        }
        if c.control_timeout.is_zero() || c.convert_timeout.is_zero() {
            return Err(DocbridgeError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if c.cache_path.as_os_str().is_empty() {
            return Err(DocbridgeError::InvalidConfig(
                "cache path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Settings file ────────────────────────────────────────────────────────

/// `[timeouts]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    pub control_secs: Option<u64>,
    pub convert_secs: Option<u64>,
}

/// `[pipeline]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    pub max_hops: Option<usize>,
    pub intermediates: Option<Vec<String>>,
}

fn default_weight() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

/// One `[[converter]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterSettings {
    /// Executable; `~` and `$VARS` are expanded.
    pub path: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Arguments placed before the protocol verb.
    #[serde(default)]
    pub args: Vec<String>,
    /// Registry id. Defaults to the expanded path.
    pub id: Option<String>,
    /// Verb used for capability discovery (`describe` unless overridden).
    pub describe_verb: Option<String>,
}

/// The `docbridge.toml` document.
///
/// ```toml
/// cache_file = "~/.cache/docbridge/converters.yaml"
///
/// [timeouts]
/// control_secs = 10
/// convert_secs = 300
///
/// [pipeline]
/// max_hops = 4
/// intermediates = ["pdf", "ps", "html"]
///
/// [[converter]]
/// path = "${HOME}/helpers/pandoc.sh"
/// weight = 0.9
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub cache_file: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default, rename = "converter")]
    pub converters: Vec<ConverterSettings>,
    /// Register the in-process plain-text converter.
    #[serde(default = "default_true")]
    pub builtin_plaintext: bool,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            cache_file: None,
            timeouts: TimeoutSettings::default(),
            pipeline: PipelineSettings::default(),
            converters: Vec::new(),
            builtin_plaintext: true,
        }
    }
}

impl SettingsFile {
    pub fn parse(body: &str) -> Result<Self, DocbridgeError> {
        toml::from_str(body).map_err(|e| DocbridgeError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DocbridgeError> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            DocbridgeError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        let settings = Self::parse(&body).map_err(|e| match e {
            DocbridgeError::InvalidConfig(detail) => {
                DocbridgeError::InvalidConfig(format!("'{}': {detail}", path.display()))
            }
            other => other,
        })?;
        debug!(path = %path.display(), converters = settings.converters.len(), "Loaded settings");
        Ok(settings)
    }

    /// Load `explicit` if given, else `./docbridge.toml` if it exists, else
    /// defaults. Returns the path actually read.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), DocbridgeError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let fallback = Path::new(DEFAULT_SETTINGS_FILE);
        if fallback.is_file() {
            return Ok((Self::load(fallback)?, Some(fallback.to_path_buf())));
        }
        Ok((Self::default(), None))
    }

    /// Apply the file's values on top of `builder`.
    pub fn apply(&self, mut builder: EngineConfigBuilder) -> Result<EngineConfigBuilder, DocbridgeError> {
        if let Some(cache) = &self.cache_file {
            builder = builder.cache_path(expand_path(cache)?);
        }
        if let Some(secs) = self.timeouts.control_secs {
            builder = builder.control_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeouts.convert_secs {
            builder = builder.convert_timeout(Duration::from_secs(secs));
        }
        if let Some(hops) = self.pipeline.max_hops {
            builder = builder.max_hops(hops);
        }
        if let Some(list) = &self.pipeline.intermediates {
            let formats = list
                .iter()
                .map(|f| Format::new(f).map_err(|e| DocbridgeError::InvalidConfig(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.intermediate_priority(formats);
        }
        Ok(builder)
    }

    /// Register every configured converter plus the built-ins.
    pub fn build_registry(&self, config: &EngineConfig) -> Result<ConverterRegistry, DocbridgeError> {
        let mut registry = ConverterRegistry::new();
        if self.builtin_plaintext {
            registry.register(Arc::new(PlaintextConverter), PLAINTEXT_WEIGHT)?;
        }
        for entry in &self.converters {
            let program = expand_program(&entry.path)?;
            let mut converter = ExternalConverter::new(program)
                .with_leading_args(entry.args.iter().cloned())
                .with_control_timeout(config.control_timeout)
                .with_convert_timeout(config.convert_timeout);
            if let Some(id) = &entry.id {
                converter = converter.with_id(id.clone());
            }
            if let Some(verb) = &entry.describe_verb {
                converter = converter.with_describe_verb(verb.clone());
            }
            registry.register(Arc::new(converter), entry.weight)?;
        }
        Ok(registry)
    }
}

fn expand(raw: &str) -> Result<PathBuf, DocbridgeError> {
    shellexpand::full(raw)
        .map(|s| PathBuf::from(s.as_ref()))
        .map_err(|e| DocbridgeError::InvalidConfig(format!("cannot expand '{raw}': {e}")))
}

/// Expand `~` and environment variables, then anchor relative paths at the
/// current directory.
pub fn expand_path(raw: &str) -> Result<PathBuf, DocbridgeError> {
    let path = expand(raw)?;
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir()
        .map_err(|e| DocbridgeError::InvalidConfig(format!("cannot read current directory: {e}")))?;
    Ok(cwd.join(path))
}

/// Like [`expand_path`], except that a bare program name is left alone so it
/// is looked up on `PATH`.
fn expand_program(raw: &str) -> Result<PathBuf, DocbridgeError> {
    let path = expand(raw)?;
    if path.components().count() == 1 && !path.is_absolute() {
        return Ok(path);
    }
    expand_path(raw)
}

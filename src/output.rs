//! Result types returned by the engine.

use crate::cache::CapabilityCache;
use crate::format::{Format, QualityMode};
use crate::pipeline::CompletedStep;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Outcome of a successful conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub from: Format,
    pub to: Format,
    /// Mode the caller asked for. Individual hops may have run in `normal`;
    /// see [`CompletedStep::mode`].
    pub mode: QualityMode,
    /// One entry per hop; a direct conversion has exactly one.
    pub steps: Vec<CompletedStep>,
    /// Size of the final output in bytes.
    pub output_bytes: u64,
    /// Wall-clock time for the whole request.
    pub duration_ms: u64,
}

impl ConversionReport {
    pub fn is_pipeline(&self) -> bool {
        self.steps.len() > 1
    }

    /// Total candidates tried across all hops.
    pub fn attempts(&self) -> usize {
        self.steps.iter().map(|s| s.attempts).sum()
    }
}

/// Outcome of negotiating with every registered converter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheReport {
    /// Where the cache was written, if it was persisted.
    pub path: Option<PathBuf>,
    pub available: Vec<String>,
    /// `(id, reason)` for each excluded converter.
    pub unavailable: Vec<(String, String)>,
    /// Direct `(from, to)` pairs in the new cache.
    pub conversions: usize,
}

/// Which direct conversions exist, for display.
///
/// Only formats that appear both as a source and as a target are listed;
/// the others would produce an all-empty row or column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatMatrix {
    pub formats: Vec<Format>,
    pairs: BTreeSet<(Format, Format)>,
}

impl FormatMatrix {
    pub fn from_cache(cache: &CapabilityCache) -> Self {
        let inputs = cache.supported_input_formats();
        let outputs = cache.supported_output_formats();
        let formats = inputs.intersection(&outputs).cloned().collect();
        let pairs = cache
            .edges()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        Self { formats, pairs }
    }

    pub fn supports(&self, from: &Format, to: &Format) -> bool {
        self.pairs.contains(&(from.clone(), to.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Plain-text grid: rows are sources, columns targets; `✓` marks a
    /// direct converter, `·` none, `-` the diagonal.
    pub fn render(&self) -> String {
        let width = self
            .formats
            .iter()
            .map(|f| f.as_str().len())
            .max()
            .unwrap_or(0)
            .max("FROM\\TO".len());

        let mut out = String::new();
        let _ = write!(out, "{:<width$}", "FROM\\TO");
        for to in &self.formats {
            let _ = write!(out, " {:^w$}", to, w = to.as_str().len().max(1));
        }
        out.push('\n');

        for from in &self.formats {
            let _ = write!(out, "{from:<width$}");
            for to in &self.formats {
                let mark = if from == to {
                    "-"
                } else if self.supports(from, to) {
                    "✓"
                } else {
                    "·"
                };
                let _ = write!(out, " {:^w$}", mark, w = to.as_str().len().max(1));
            }
            out.push('\n');
        }
        out
    }
}

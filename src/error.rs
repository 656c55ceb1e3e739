//! Error types for the docbridge library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`DocbridgeError`] — **Terminal**: the request as a whole failed
//!   (no route between the formats, bad input path, every candidate
//!   exhausted). Returned as `Err(DocbridgeError)` from the engine.
//!
//! * [`ConverterError`] — **Per-candidate**: one converter failed one
//!   conversion. The fallback executor recovers from these by trying the
//!   next candidate; only the last one is attached to the terminal error.
//!
//! * [`NegotiationError`] — **Per-converter, initialisation only**: a
//!   converter failed `ping` or returned an unusable descriptor. It is
//!   logged and the converter is excluded; conversion callers never see it.

use crate::format::Format;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All terminal errors returned by the docbridge library.
#[derive(Debug, Error)]
pub enum DocbridgeError {
    // ── Routing errors ────────────────────────────────────────────────────
    /// No direct converter and no pipeline could be resolved.
    #[error("Unsupported conversion: no converter or pipeline for {from} → {to}")]
    UnsupportedConversion { from: Format, to: Format },

    /// Every viable candidate failed. `step` is set when the failure happened
    /// inside a multi-hop pipeline.
    #[error(
        "Conversion {from} → {to} failed{} after {attempts} attempt(s): {source}",
        describe_step(.step)
    )]
    ConversionFailed {
        from: Format,
        to: Format,
        attempts: usize,
        step: Option<StepFailure>,
        #[source]
        source: ConverterError,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The source path does not exist, is not a file, or is not readable.
    #[error("Invalid input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    // ── Cache errors ──────────────────────────────────────────────────────
    /// The capability cache could not be read or written.
    #[error("Capability cache I/O failed for '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The capability cache file exists but is not a valid cache document.
    #[error("Capability cache '{path}' is malformed: {detail}\nRun `docbridge rebuild-cache`.")]
    CacheParse { path: PathBuf, detail: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// An intermediate artifact could not be staged.
    #[error("Failed to stage intermediate artifact '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request was cancelled before it completed.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or settings-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Location of a failed hop inside a multi-step pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// 1-indexed hop number.
    pub step: usize,
    /// Number of hops in the chain.
    pub total: usize,
    pub from: Format,
    pub to: Format,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {}/{} ({} → {})",
            self.step, self.total, self.from, self.to
        )
    }
}

fn describe_step(step: &Option<StepFailure>) -> String {
    match step {
        Some(s) => format!(" at pipeline {s}"),
        None => String::new(),
    }
}

/// A single converter failed a single conversion attempt.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// The converter process could not be started.
    #[error("{converter}: failed to spawn: {source}")]
    Spawn {
        converter: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter exited unsuccessfully. `stderr` is diagnostic only.
    #[error("{converter}: {status}: {stderr}")]
    Exit {
        converter: String,
        status: String,
        stderr: String,
    },

    /// The converter did not finish within the convert timeout.
    #[error("{converter}: timed out after {secs}s")]
    Timeout { converter: String, secs: u64 },

    /// The call was cancelled while in flight.
    #[error("{converter}: cancelled")]
    Cancelled { converter: String },

    /// An in-process converter failed reading or writing a file.
    #[error("{converter}: I/O error: {source}")]
    Io {
        converter: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter was asked for a pair it does not handle.
    #[error("{converter}: does not support {from} → {to}")]
    Unsupported {
        converter: String,
        from: Format,
        to: Format,
    },

    /// The cache references a converter that is not registered this run.
    #[error("{converter}: not registered")]
    Missing { converter: String },

    /// Every candidate for the hop was excluded before it could be tried.
    #[error("no converter left for {from} → {to}")]
    NoCandidates { from: Format, to: Format },
}

/// A converter failed capability negotiation and is excluded for this run.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// `ping` failed, timed out, or did not answer `pong`.
    #[error("{converter}: ping failed: {detail}")]
    PingFailed { converter: String, detail: String },

    /// `describe` exited with a non-zero status.
    #[error("{converter}: describe exited with {status}: {stderr}")]
    DescribeExit {
        converter: String,
        status: String,
        stderr: String,
    },

    /// `describe` succeeded with an empty body: the converter cannot serve now.
    #[error("{converter}: temporarily unavailable (empty descriptor)")]
    TemporarilyUnavailable { converter: String },

    /// The descriptor body could not be parsed or violates the schema.
    #[error("{converter}: invalid descriptor: {detail}")]
    InvalidDescriptor { converter: String, detail: String },

    /// The descriptor parsed but lists no format pairs.
    #[error("{converter}: descriptor lists no capabilities")]
    NoCapabilities { converter: String },

    /// The negotiation command could not be run at all.
    #[error("{converter}: {detail}")]
    Command { converter: String, detail: String },
}

impl NegotiationError {
    /// `true` when the converter reported it simply cannot serve right now.
    pub fn is_transient(&self) -> bool {
        matches!(self, NegotiationError::TemporarilyUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(s: &str) -> Format {
        Format::new(s).unwrap()
    }

    #[test]
    fn unsupported_names_the_pair() {
        let e = DocbridgeError::UnsupportedConversion {
            from: fmt("djvu"),
            to: fmt("docx"),
        };
        let msg = e.to_string();
        assert!(msg.contains("djvu → docx"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_without_step() {
        let e = DocbridgeError::ConversionFailed {
            from: fmt("md"),
            to: fmt("pdf"),
            attempts: 2,
            step: None,
            source: ConverterError::Exit {
                converter: "pandoc".into(),
                status: "exit status: 3".into(),
                stderr: "missing font".into(),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("md → pdf"), "got: {msg}");
        assert!(msg.contains("2 attempt(s)"), "got: {msg}");
        assert!(msg.contains("missing font"), "got: {msg}");
        assert!(!msg.contains("pipeline"), "got: {msg}");
    }

    #[test]
    fn conversion_failed_names_the_hop() {
        let e = DocbridgeError::ConversionFailed {
            from: fmt("djvu"),
            to: fmt("html"),
            attempts: 1,
            step: Some(StepFailure {
                step: 2,
                total: 2,
                from: fmt("ps"),
                to: fmt("html"),
            }),
            source: ConverterError::Timeout {
                converter: "ghostscript".into(),
                secs: 300,
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("djvu → html"), "got: {msg}");
        assert!(msg.contains("step 2/2 (ps → html)"), "got: {msg}");
        assert!(msg.contains("300s"), "got: {msg}");
    }

    #[test]
    fn only_empty_descriptor_is_transient() {
        let transient = NegotiationError::TemporarilyUnavailable {
            converter: "calibre".into(),
        };
        let hard = NegotiationError::NoCapabilities {
            converter: "calibre".into(),
        };
        assert!(transient.is_transient());
        assert!(!hard.is_transient());
    }
}

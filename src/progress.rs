//! Progress-callback trait for per-hop conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::EngineConfigBuilder::progress_callback`] to follow a
//! request as it moves through its pipeline hops and fallback candidates.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a channel, a log sink or a terminal
//! progress bar without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because the engine may serve
//! several requests at once.
//!
//! # Example
//!
//! ```rust
//! use docbridge::{ConversionProgressCallback, EngineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for FailureCounter {
//!     fn on_candidate_failed(&self, step: usize, converter: &str, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("hop {step}: {converter} failed: {error}");
//!     }
//! }
//!
//! let config = EngineConfig::builder()
//!     .progress_callback(Arc::new(FailureCounter { failures: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::format::Format;
use std::sync::Arc;

/// Called by the engine as a request runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Steps are 1-indexed; a direct conversion is a
/// single-step chain.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the route is known, before the first hop runs.
    fn on_conversion_start(&self, total_steps: usize) {
        let _ = total_steps;
    }

    /// Called before the first candidate of a hop is tried.
    fn on_step_start(&self, step: usize, total_steps: usize, from: &Format, to: &Format) {
        let _ = (step, total_steps, from, to);
    }

    /// Called each time a candidate fails and the next one will be tried.
    ///
    /// # Arguments
    /// * `step`      — 1-indexed hop number
    /// * `converter` — id of the failed candidate
    /// * `error`     — human-readable failure description
    fn on_candidate_failed(&self, step: usize, converter: &str, error: &str) {
        let _ = (step, converter, error);
    }

    /// Called when a hop has produced its output.
    fn on_step_complete(&self, step: usize, total_steps: usize, converter: &str) {
        let _ = (step, total_steps, converter);
    }

    /// Called once after the request finished, successfully or not.
    fn on_conversion_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::EngineConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

//! Weighted fallback: try the candidates of one hop in cache order until one
//! succeeds.
//!
//! A candidate that fails is removed from every mode bucket of that exact
//! `(from, to)` pair in the live cache, so later requests in the same process
//! skip it. The same converter stays eligible for every other pair: failing
//! to render `md → pdf` says nothing about `md → html`.

use crate::cache::SharedCache;
use crate::converter::ConversionJob;
use crate::error::{ConverterError, DocbridgeError};
use crate::format::QualityMode;
use crate::progress::ProgressCallback;
use crate::registry::ConverterRegistry;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which candidate produced a hop's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopOutcome {
    pub converter: String,
    /// Mode the converter was invoked with; `normal` after a mode fallback.
    pub mode: QualityMode,
    pub attempts: usize,
}

#[derive(Clone)]
pub struct FallbackExecutor {
    cache: SharedCache,
    registry: Arc<ConverterRegistry>,
    progress: Option<ProgressCallback>,
}

impl FallbackExecutor {
    pub fn new(cache: SharedCache, registry: Arc<ConverterRegistry>) -> Self {
        Self {
            cache,
            registry,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run one direct conversion.
    ///
    /// `step` is the 1-indexed hop number reported to the progress callback.
    ///
    /// # Errors
    /// * [`DocbridgeError::UnsupportedConversion`] — no candidate for the pair
    ///   in the requested mode or in `normal`.
    /// * [`DocbridgeError::ConversionFailed`] — every candidate failed; carries
    ///   the last candidate's error and the attempt count.
    /// * [`DocbridgeError::Cancelled`] — `cancel` fired.
    pub async fn execute(
        &self,
        job: &ConversionJob,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<HopOutcome, DocbridgeError> {
        let (mode, candidates) = self
            .cache
            .find_candidates(&job.from, &job.to, job.mode)
            .ok_or_else(|| DocbridgeError::UnsupportedConversion {
                from: job.from.clone(),
                to: job.to.clone(),
            })?;

        let hop = ConversionJob {
            mode,
            ..job.clone()
        };
        let mut attempts = 0;
        let mut last_error: Option<ConverterError> = None;

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(DocbridgeError::Cancelled);
            }
            if !self
                .cache
                .still_eligible(&hop.from, &hop.to, mode, &candidate.converter)
            {
                debug!(converter = %candidate.converter, "Candidate excluded meanwhile, skipping");
                continue;
            }
            attempts += 1;

            let result = match self.registry.get(&candidate.converter) {
                Some(converter) => converter.convert(&hop, cancel).await,
                None => Err(ConverterError::Missing {
                    converter: candidate.converter.clone(),
                }),
            };

            match result {
                Ok(()) => {
                    return Ok(HopOutcome {
                        converter: candidate.converter,
                        mode,
                        attempts,
                    })
                }
                Err(e) => {
                    remove_partial(&hop.output).await;
                    if cancel.is_cancelled() || matches!(e, ConverterError::Cancelled { .. }) {
                        return Err(DocbridgeError::Cancelled);
                    }
                    warn!(
                        converter = %candidate.converter,
                        from = %hop.from,
                        to = %hop.to,
                        weight = candidate.weight,
                        "Candidate failed, trying next: {}",
                        e
                    );
                    self.cache
                        .mark_failed(&hop.from, &hop.to, &candidate.converter);
                    if let Some(cb) = &self.progress {
                        cb.on_candidate_failed(step, &candidate.converter, &e.to_string());
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(DocbridgeError::ConversionFailed {
            from: hop.from.clone(),
            to: hop.to.clone(),
            attempts,
            step: None,
            source: last_error.unwrap_or(ConverterError::NoCandidates {
                from: hop.from.clone(),
                to: hop.to.clone(),
            }),
        })
    }
}

/// Delete whatever a failed candidate left at the output path.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Could not remove partial output: {}", e),
    }
}

//! Runs a resolved chain hop by hop.
//!
//! Intermediate artifacts live in a per-request staging directory created on
//! first use. The directory is a [`tempfile::TempDir`], so it is removed when
//! the chain succeeds, when a hop fails, and when the request future is
//! dropped mid-flight. Only the final hop writes outside it, directly to the
//! requested output path.

use super::resolver::PipelineStep;
use crate::converter::ConversionJob;
use crate::error::{ConverterError, DocbridgeError, StepFailure};
use crate::fallback::{FallbackExecutor, HopOutcome};
use crate::format::{Format, QualityMode};
use crate::progress::ProgressCallback;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A hop that produced its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStep {
    pub from: Format,
    pub to: Format,
    pub converter: String,
    pub mode: QualityMode,
    pub attempts: usize,
}

/// Lazily created, request-owned directory for intermediate artifacts.
struct StagingArea {
    base: Option<PathBuf>,
    dir: Option<TempDir>,
}

impl StagingArea {
    fn new(base: Option<PathBuf>) -> Self {
        Self { base, dir: None }
    }

    /// Fresh, format-tagged path for the output of hop `step`.
    fn artifact(&mut self, step: usize, format: &Format) -> Result<PathBuf, DocbridgeError> {
        if self.dir.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("docbridge-");
            let created = match &self.base {
                Some(base) => builder.tempdir_in(base),
                None => builder.tempdir(),
            };
            let dir = created.map_err(|source| DocbridgeError::Staging {
                path: self.base.clone().unwrap_or_else(std::env::temp_dir),
                source,
            })?;
            debug!(dir = %dir.path().display(), "Created staging directory");
            self.dir = Some(dir);
        }
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| DocbridgeError::Internal("staging directory vanished".into()))?;
        Ok(dir.path().join(format!("step{step}.{format}")))
    }

    fn cleanup(self) {
        if let Some(dir) = self.dir {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(dir = %path.display(), "Removed staging directory"),
                Err(e) => warn!(dir = %path.display(), "Could not remove staging directory: {}", e),
            }
        }
    }
}

#[derive(Clone)]
pub struct PipelineExecutor {
    fallback: FallbackExecutor,
    staging_dir: Option<PathBuf>,
    progress: Option<ProgressCallback>,
}

impl PipelineExecutor {
    pub fn new(fallback: FallbackExecutor) -> Self {
        Self {
            fallback,
            staging_dir: None,
            progress: None,
        }
    }

    /// Parent directory for staging directories (system temp dir if unset).
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every hop of `steps`, reading `input` and finally writing `output`.
    ///
    /// A failing hop stops the chain. The error names the requested pair and,
    /// for chains longer than one hop, the failing hop.
    pub async fn run(
        &self,
        steps: &[PipelineStep],
        input: &Path,
        output: &Path,
        mode: QualityMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedStep>, DocbridgeError> {
        let (Some(first), Some(last)) = (steps.first(), steps.last()) else {
            return Err(DocbridgeError::Internal("empty conversion chain".into()));
        };
        let (from, to) = (first.from.clone(), last.to.clone());
        let total = steps.len();

        let mut staging = StagingArea::new(self.staging_dir.clone());
        let result = self
            .run_hops(steps, input, output, mode, &mut staging, cancel)
            .await;
        staging.cleanup();

        result.map_err(|(index, err)| annotate(err, &steps[index], index + 1, total, &from, &to))
    }

    async fn run_hops(
        &self,
        steps: &[PipelineStep],
        input: &Path,
        output: &Path,
        mode: QualityMode,
        staging: &mut StagingArea,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedStep>, (usize, DocbridgeError)> {
        let total = steps.len();
        let mut completed = Vec::with_capacity(total);
        let mut current_input = input.to_path_buf();

        for (index, step) in steps.iter().enumerate() {
            let number = index + 1;
            let hop_output = if number == total {
                output.to_path_buf()
            } else {
                staging
                    .artifact(number, &step.to)
                    .map_err(|e| (index, e))?
            };

            if let Some(cb) = &self.progress {
                cb.on_step_start(number, total, &step.from, &step.to);
            }
            debug!(
                step = number,
                total,
                from = %step.from,
                to = %step.to,
                output = %hop_output.display(),
                "Running hop"
            );

            let job = ConversionJob {
                mode,
                from: step.from.clone(),
                input: current_input.clone(),
                to: step.to.clone(),
                output: hop_output.clone(),
            };
            let HopOutcome {
                converter,
                mode: used_mode,
                attempts,
            } = self
                .fallback
                .execute(&job, number, cancel)
                .await
                .map_err(|e| (index, e))?;

            if let Some(cb) = &self.progress {
                cb.on_step_complete(number, total, &converter);
            }
            completed.push(CompletedStep {
                from: step.from.clone(),
                to: step.to.clone(),
                converter,
                mode: used_mode,
                attempts,
            });
            current_input = hop_output;
        }
        Ok(completed)
    }
}

/// Re-target a hop error at the requested pair.
fn annotate(
    err: DocbridgeError,
    step: &PipelineStep,
    number: usize,
    total: usize,
    from: &Format,
    to: &Format,
) -> DocbridgeError {
    if total == 1 {
        return err;
    }
    let failure = StepFailure {
        step: number,
        total,
        from: step.from.clone(),
        to: step.to.clone(),
    };
    match err {
        DocbridgeError::ConversionFailed {
            attempts, source, ..
        } => DocbridgeError::ConversionFailed {
            from: from.clone(),
            to: to.clone(),
            attempts,
            step: Some(failure),
            source,
        },
        DocbridgeError::UnsupportedConversion { .. } => DocbridgeError::ConversionFailed {
            from: from.clone(),
            to: to.clone(),
            attempts: 0,
            step: Some(failure),
            source: ConverterError::NoCandidates {
                from: step.from.clone(),
                to: step.to.clone(),
            },
        },
        other => other,
    }
}

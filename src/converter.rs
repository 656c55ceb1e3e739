//! The converter capability shared by in-process and external converters.
//!
//! Everything above this trait (registry, fallback executor, pipeline) talks
//! to converters only through [`Converter`]; whether the implementation runs
//! a subprocess ([`crate::negotiation::ExternalConverter`]) or does the work
//! in-process ([`crate::builtin::PlaintextConverter`]) is invisible to them.

use crate::capability::CapabilityDescriptor;
use crate::error::{ConverterError, NegotiationError};
use crate::format::{Format, QualityMode};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One direct conversion handed to a converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub mode: QualityMode,
    pub from: Format,
    pub input: PathBuf,
    pub to: Format,
    pub output: PathBuf,
}

/// A component able to transform documents between formats.
///
/// Implementations must be `Send + Sync`: negotiation runs converters
/// concurrently and the engine may serve several requests at once.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Stable registry id (used as the tie-break key in candidate lists).
    fn id(&self) -> &str;

    /// Availability check. `false` excludes the converter for this run.
    async fn ping(&self, cancel: &CancellationToken) -> bool;

    /// Report capabilities. Only called after a successful [`Converter::ping`].
    async fn describe(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CapabilityDescriptor, NegotiationError>;

    /// Perform one conversion, writing to `job.output`.
    async fn convert(
        &self,
        job: &ConversionJob,
        cancel: &CancellationToken,
    ) -> Result<(), ConverterError>;
}

/// Shared handle to a registered converter.
pub type ConverterHandle = Arc<dyn Converter>;

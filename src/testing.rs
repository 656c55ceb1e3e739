//! In-process converter double for unit tests.

use crate::capability::CapabilityDescriptor;
use crate::converter::{ConversionJob, Converter};
use crate::error::{ConverterError, NegotiationError};
use crate::format::{Format, QualityMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared record of `"{id}:{from}->{to}"` for every convert call.
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn fmt(s: &str) -> Format {
    Format::new(s).unwrap()
}

#[derive(Clone)]
pub(crate) struct MockConverter {
    id: String,
    descriptor: CapabilityDescriptor,
    ping_ok: bool,
    empty_descriptor: bool,
    failing: BTreeSet<(Format, Format)>,
    calls: CallLog,
}

impl MockConverter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            descriptor: CapabilityDescriptor::new(id, id),
            ping_ok: true,
            empty_descriptor: false,
            failing: BTreeSet::new(),
            calls: CallLog::default(),
        }
    }

    pub fn pair(self, from: &str, to: &str) -> Self {
        self.pair_with_modes(from, to, &[])
    }

    pub fn pair_with_modes(mut self, from: &str, to: &str, extra: &[QualityMode]) -> Self {
        self.descriptor = self.descriptor.with_pair(fmt(from), fmt(to), extra);
        self
    }

    /// `ping` answers `false`.
    pub fn offline(mut self) -> Self {
        self.ping_ok = false;
        self
    }

    /// `describe` reports the converter as temporarily unavailable.
    pub fn idle(mut self) -> Self {
        self.empty_descriptor = true;
        self
    }

    /// `convert` fails for this pair after writing a partial output.
    pub fn failing(mut self, from: &str, to: &str) -> Self {
        self.failing.insert((fmt(from), fmt(to)));
        self
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.calls = Arc::clone(log);
        self
    }

    pub fn handle(self) -> Arc<dyn Converter> {
        Arc::new(self)
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn ping(&self, _cancel: &CancellationToken) -> bool {
        self.ping_ok
    }

    async fn describe(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<CapabilityDescriptor, NegotiationError> {
        if self.empty_descriptor {
            return Err(NegotiationError::TemporarilyUnavailable {
                converter: self.id.clone(),
            });
        }
        Ok(self.descriptor.clone())
    }

    async fn convert(
        &self,
        job: &ConversionJob,
        _cancel: &CancellationToken,
    ) -> Result<(), ConverterError> {
        let tag = format!("{}:{}->{}", self.id, job.from, job.to);
        self.calls.lock().push(tag.clone());

        let io_err = |source| ConverterError::Io {
            converter: self.id.clone(),
            source,
        };
        if self.failing.contains(&(job.from.clone(), job.to.clone())) {
            std::fs::write(&job.output, "partial").map_err(io_err)?;
            return Err(ConverterError::Exit {
                converter: self.id.clone(),
                status: "exit status: 1".into(),
                stderr: format!("{} refused", self.id),
            });
        }

        let upstream = std::fs::read_to_string(&job.input).unwrap_or_default();
        std::fs::write(&job.output, format!("{upstream}|{tag}")).map_err(io_err)?;
        Ok(())
    }
}

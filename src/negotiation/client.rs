//! Subprocess adapter speaking the three-verb negotiation protocol.
//!
//! ```text
//! <program> [leading args] ping
//! <program> [leading args] describe
//! <program> [leading args] convert <mode> <from> <fromPath> <to> <toPath>
//! ```

use super::command::{CommandError, ToolCommand, DEFAULT_CONTROL_TIMEOUT, DEFAULT_CONVERT_TIMEOUT};
use crate::capability::CapabilityDescriptor;
use crate::converter::{ConversionJob, Converter};
use crate::error::{ConverterError, NegotiationError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Verb used to request the capability descriptor.
pub const DEFAULT_DESCRIBE_VERB: &str = "describe";

/// An out-of-process converter reached through the negotiation protocol.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    id: String,
    program: PathBuf,
    leading_args: Vec<String>,
    describe_verb: String,
    control_timeout: Duration,
    convert_timeout: Duration,
}

impl ExternalConverter {
    /// A converter whose registry id is the program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            id: program.display().to_string(),
            program,
            leading_args: Vec::new(),
            describe_verb: DEFAULT_DESCRIBE_VERB.to_string(),
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            convert_timeout: DEFAULT_CONVERT_TIMEOUT,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Arguments placed before the verb, e.g. the script for an interpreter.
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_describe_verb(mut self, verb: impl Into<String>) -> Self {
        self.describe_verb = verb.into();
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_convert_timeout(mut self, timeout: Duration) -> Self {
        self.convert_timeout = timeout;
        self
    }

    fn command(&self, verb: &str, timeout: Duration) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(&self.leading_args)
            .arg(verb)
            .timeout(timeout);
        cmd
    }

    /// `ping` with the failure reason kept.
    pub async fn try_ping(&self, cancel: &CancellationToken) -> Result<(), NegotiationError> {
        let output = self
            .command("ping", self.control_timeout)
            .execute(cancel)
            .await
            .map_err(|e| NegotiationError::PingFailed {
                converter: self.id.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(NegotiationError::PingFailed {
                converter: self.id.clone(),
                detail: output.status.to_string(),
            });
        }

        let body = output.stdout.trim();
        if body != "pong" {
            return Err(NegotiationError::PingFailed {
                converter: self.id.clone(),
                detail: format!("unexpected response {body:?}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Converter for ExternalConverter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn ping(&self, cancel: &CancellationToken) -> bool {
        match self.try_ping(cancel).await {
            Ok(()) => {
                debug!(converter = %self.id, "ping ok");
                true
            }
            Err(e) => {
                debug!(converter = %self.id, "ping failed: {}", e);
                false
            }
        }
    }

    async fn describe(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CapabilityDescriptor, NegotiationError> {
        let output = self
            .command(&self.describe_verb, self.control_timeout)
            .execute(cancel)
            .await
            .map_err(|e| NegotiationError::Command {
                converter: self.id.clone(),
                detail: format!("describe {e}"),
            })?;

        if !output.status.success() {
            return Err(NegotiationError::DescribeExit {
                converter: self.id.clone(),
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        let body = output.stdout.trim();
        if body.is_empty() {
            return Err(NegotiationError::TemporarilyUnavailable {
                converter: self.id.clone(),
            });
        }

        let descriptor = CapabilityDescriptor::parse(&self.id, body)?;
        debug!(
            converter = %self.id,
            name = %descriptor.display_name,
            pairs = descriptor.pair_count(),
            "descriptor loaded"
        );
        Ok(descriptor)
    }

    async fn convert(
        &self,
        job: &ConversionJob,
        cancel: &CancellationToken,
    ) -> Result<(), ConverterError> {
        let mut cmd = self.command("convert", self.convert_timeout);
        cmd.arg(job.mode.as_str())
            .arg(job.from.as_str())
            .arg(&job.input)
            .arg(job.to.as_str())
            .arg(&job.output);

        let output = cmd.execute(cancel).await.map_err(|e| match e {
            CommandError::Spawn(source) | CommandError::Wait(source) => ConverterError::Spawn {
                converter: self.id.clone(),
                source,
            },
            CommandError::TimedOut(d) => ConverterError::Timeout {
                converter: self.id.clone(),
                secs: d.as_secs(),
            },
            CommandError::Cancelled => ConverterError::Cancelled {
                converter: self.id.clone(),
            },
        })?;

        if !output.status.success() {
            return Err(ConverterError::Exit {
                converter: self.id.clone(),
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        info!(
            converter = %self.id,
            mode = %job.mode,
            from = %job.from,
            to = %job.to,
            "Converted {} → {}",
            job.input.display(),
            job.output.display()
        );
        Ok(())
    }
}

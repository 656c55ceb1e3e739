//! In-process converters that need no external tool.
//!
//! The plain-text converter gives the pipeline resolver a cheap way out of
//! `txt`: `txt → html` and `txt → md` are always available, so a chain like
//! `djvu → txt → md` can still be resolved when nothing richer exists.

use crate::capability::CapabilityDescriptor;
use crate::converter::{ConversionJob, Converter};
use crate::error::{ConverterError, NegotiationError};
use crate::format::Format;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Registry id of [`PlaintextConverter`].
pub const PLAINTEXT_ID: &str = "builtin:plaintext";

/// Default weight: below any external converter a user would configure.
pub const PLAINTEXT_WEIGHT: f64 = 0.1;

/// Converts plain text to HTML or Markdown.
#[derive(Debug, Clone, Default)]
pub struct PlaintextConverter;

#[async_trait]
impl Converter for PlaintextConverter {
    fn id(&self) -> &str {
        PLAINTEXT_ID
    }

    async fn ping(&self, _cancel: &CancellationToken) -> bool {
        true
    }

    async fn describe(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<CapabilityDescriptor, NegotiationError> {
        let mut descriptor = CapabilityDescriptor::new(PLAINTEXT_ID, "plaintext");
        descriptor.description = Some("Plain text to HTML/Markdown".to_string());
        let invalid = |e: crate::format::InvalidFormat| NegotiationError::InvalidDescriptor {
            converter: PLAINTEXT_ID.to_string(),
            detail: e.to_string(),
        };
        let txt = Format::new("txt").map_err(invalid)?;
        for target in ["html", "md"] {
            let to = Format::new(target).map_err(invalid)?;
            descriptor = descriptor.with_pair(txt.clone(), to, &[]);
        }
        Ok(descriptor)
    }

    async fn convert(
        &self,
        job: &ConversionJob,
        _cancel: &CancellationToken,
    ) -> Result<(), ConverterError> {
        let io_err = |source| ConverterError::Io {
            converter: PLAINTEXT_ID.to_string(),
            source,
        };

        if job.from.as_str() != "txt" {
            return Err(ConverterError::Unsupported {
                converter: PLAINTEXT_ID.to_string(),
                from: job.from.clone(),
                to: job.to.clone(),
            });
        }

        let text = tokio::fs::read_to_string(&job.input).await.map_err(io_err)?;
        let rendered = match job.to.as_str() {
            "html" => text_to_html(&text),
            "md" => text_to_markdown(&text),
            _ => {
                return Err(ConverterError::Unsupported {
                    converter: PLAINTEXT_ID.to_string(),
                    from: job.from.clone(),
                    to: job.to.clone(),
                })
            }
        };
        tokio::fs::write(&job.output, &rendered)
            .await
            .map_err(io_err)?;

        info!(
            converter = PLAINTEXT_ID,
            to = %job.to,
            bytes = rendered.len(),
            "Converted plain text"
        );
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap text in a minimal HTML document: blank lines separate paragraphs,
/// single newlines become `<br>`.
pub fn text_to_html(text: &str) -> String {
    let escaped = escape_html(&text.replace("\r\n", "\n"));
    let paragraphs: Vec<String> = escaped
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>", p.replace('\n', "<br>\n")))
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n\
         <title>Converted from Plain Text</title>\n</head>\n<body>\n{}\n</body>\n</html>",
        paragraphs.join("\n")
    )
}

/// Normalise paragraph breaks so Markdown renders them as paragraphs:
/// whitespace-only lines become empty lines and runs of them collapse to one.
pub fn text_to_markdown(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if out.last().is_some_and(|l| l.is_empty()) || out.is_empty() {
                continue;
            }
            out.push("");
        } else {
            out.push(line);
        }
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    let mut md = out.join("\n");
    md.push('\n');
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::QualityMode;

    #[test]
    fn html_escapes_and_splits_paragraphs() {
        let html = text_to_html("a < b & c\nsecond line\n\nnext \"para\"");
        assert!(html.contains("<p>a &lt; b &amp; c<br>\nsecond line</p>"), "{html}");
        assert!(html.contains("<p>next &#34;para&#34;</p>"), "{html}");
        assert!(html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn markdown_collapses_blank_runs() {
        let md = text_to_markdown("\n\ntitle\n   \n\n\nbody line\nmore\n\n");
        assert_eq!(md, "title\n\nbody line\nmore\n");
    }

    #[tokio::test]
    async fn describes_txt_pairs() {
        let d = PlaintextConverter
            .describe(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(d.pair_count(), 2);
        assert!(d.validate().is_ok());
    }

    #[tokio::test]
    async fn converts_file_to_html() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        let output = dir.path().join("notes.html");
        std::fs::write(&input, "hello\n\nworld").unwrap();

        let job = ConversionJob {
            mode: QualityMode::Normal,
            from: Format::new("txt").unwrap(),
            input,
            to: Format::new("html").unwrap(),
            output: output.clone(),
        };
        PlaintextConverter
            .convert(&job, &CancellationToken::new())
            .await
            .unwrap();
        let html = std::fs::read_to_string(output).unwrap();
        assert!(html.contains("<p>hello</p>\n<p>world</p>"), "{html}");
    }

    #[tokio::test]
    async fn rejects_other_targets() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, "x").unwrap();
        let job = ConversionJob {
            mode: QualityMode::Normal,
            from: Format::new("txt").unwrap(),
            input,
            to: Format::new("pdf").unwrap(),
            output: dir.path().join("notes.pdf"),
        };
        let err = PlaintextConverter
            .convert(&job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::Unsupported { .. }));
    }
}

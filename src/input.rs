//! Request validation: check the source file and settle both formats before
//! any converter is invoked.
//!
//! ## Why validate up front?
//!
//! A missing or unreadable input would otherwise surface as a converter
//! failure, get the converter excluded for the pair, and fall through every
//! candidate. Rejecting it here keeps the live cache clean and gives the
//! caller an [`DocbridgeError::InvalidInput`] that names the real problem.

use crate::error::DocbridgeError;
use crate::format::Format;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A request whose paths and formats have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub from: Format,
    pub to: Format,
}

/// Validate `input` and determine the formats, falling back to the file
/// extensions when a format is not given explicitly.
pub fn resolve_request(
    input: &Path,
    output: &Path,
    from: Option<Format>,
    to: Option<Format>,
) -> Result<ResolvedRequest, DocbridgeError> {
    let input = check_readable(input)?;

    let from = match from.or_else(|| Format::from_path(&input)) {
        Some(f) => f,
        None => {
            return Err(DocbridgeError::InvalidInput {
                path: input,
                reason: "cannot detect the source format from the extension; pass it explicitly"
                    .into(),
            })
        }
    };
    let to = match to.or_else(|| Format::from_path(output)) {
        Some(f) => f,
        None => {
            return Err(DocbridgeError::InvalidInput {
                path: output.to_path_buf(),
                reason: "cannot detect the target format from the extension; pass it explicitly"
                    .into(),
            })
        }
    };

    if is_same_path(&input, output) {
        return Err(DocbridgeError::InvalidInput {
            path: input,
            reason: "output path is the same as the input path".into(),
        });
    }

    debug!(input = %input.display(), %from, %to, "Resolved request");
    Ok(ResolvedRequest {
        input,
        output: output.to_path_buf(),
        from,
        to,
    })
}

/// `true` when `output` names the same file as the existing `input`,
/// however either path is spelled.
fn is_same_path(input: &Path, output: &Path) -> bool {
    let Ok(input) = input.canonicalize() else {
        return input == output;
    };
    if let Ok(existing) = output.canonicalize() {
        return existing == input;
    }
    let Some(name) = output.file_name() else {
        return false;
    };
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent
        .canonicalize()
        .map(|dir| dir.join(name) == input)
        .unwrap_or(false)
}

fn check_readable(path: &Path) -> Result<PathBuf, DocbridgeError> {
    let invalid = |reason: &str| DocbridgeError::InvalidInput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(invalid("file not found")),
        Err(e) => return Err(invalid(&e.to_string())),
    };
    if !meta.is_file() {
        return Err(invalid("not a regular file"));
    }

    // Check read permission by attempting to open
    match std::fs::File::open(path) {
        Ok(_) => Ok(path.to_path_buf()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(invalid("permission denied"))
        }
        Err(e) => Err(invalid(&e.to_string())),
    }
}

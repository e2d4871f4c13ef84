//! Error taxonomy
//!
//! Only conditions that callers branch on get a typed variant. Everything
//! else travels as `anyhow::Error` with context attached at the failing seam.
//!
//! Recoverable parse problems have no variant: the parser yields a
//! best-effort tree and the builder uses it as-is. Out-of-range similarity
//! scores are flagged on the result (`anomaly`), not raised.

use std::path::PathBuf;

/// Typed errors surfaced by the detection pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpdtError {
    /// A declared submission path does not exist.
    #[error("{} is not present", path.display())]
    MissingInput { path: PathBuf },

    /// A submission exists but could not be read.
    #[error("failed to read {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external collaborator (preprocessor, diff generator) failed.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// The parser produced no tree at all (not raised for malformed code).
    #[error("parse failure: {0}")]
    Parse(String),
}

impl SpdtError {
    /// Whether this error is the fail-fast missing-input condition.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, SpdtError::MissingInput { .. })
    }
}

/// Returns the first [`SpdtError::MissingInput`] in an error chain, if any.
pub fn missing_input(err: &anyhow::Error) -> Option<&SpdtError> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<SpdtError>())
        .find(|e| e.is_missing_input())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_missing_input_message_names_path() {
        let err = SpdtError::MissingInput {
            path: PathBuf::from("sub/a.cpp"),
        };
        assert_eq!(err.to_string(), "sub/a.cpp is not present");
    }

    #[test]
    fn test_missing_input_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(SpdtError::MissingInput {
            path: PathBuf::from("x.cpp"),
        })
        .context("failed to normalize submission")
        .unwrap_err();
        assert!(missing_input(&err).is_some());
    }

    #[test]
    fn test_unreadable_reports_io_error_once() {
        let err = anyhow::Error::new(SpdtError::Unreadable {
            path: PathBuf::from("sub/alice"),
            source: std::io::Error::other("Is a directory"),
        });
        let rendered = format!("{:#}", err);
        assert_eq!(rendered, "failed to read sub/alice: Is a directory");
        assert_eq!(rendered.matches("Is a directory").count(), 1);
    }

    #[test]
    fn test_other_errors_are_not_missing_input() {
        let err = anyhow::Error::new(SpdtError::ExternalTool {
            tool: "g++".to_string(),
            message: "exit status 1".to_string(),
        });
        assert!(missing_input(&err).is_none());
    }
}

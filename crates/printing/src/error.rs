use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::composer::ComposeError;
use crate::config::ConfigError;
use crate::distribute::DistributionError;
use crate::geometry::GeometryError;
use crate::pipeline::RenderResponse;
use crate::view::{AdapterError, ScriptError};

/// Terminal failures reported to the caller. None of them is retried.
/// 回報給呼叫端的終止錯誤，皆不會自動重試。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("page geometry is invalid: {0}")]
    GeometryInvalid(#[from] GeometryError),
    #[error("no view is bound to the pipeline")]
    ViewUnavailable,
    #[error("failed to write {destination}: {source}")]
    WriteFailure {
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("print job `{job}` completed but {expected} was not found")]
    ArtifactMissing { job: String, expected: PathBuf },
    #[error("print job `{job}` failed: {reason}")]
    PrintJobFailed { job: String, reason: String },
    #[error("print job `{job}` was cancelled")]
    PrintJobCancelled { job: String },
    #[error("print job `{job}` did not finish within {waited:?}")]
    PrintJobTimeout { job: String, waited: Duration },
    #[error("PDF file not found at path: {0}")]
    ArtifactNotFound(PathBuf),
    #[error("distribution failed: {0}")]
    DistributionFailure(#[from] DistributionError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Payload-free discriminant of [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    GeometryInvalid,
    ViewUnavailable,
    WriteFailure,
    ArtifactMissing,
    PrintJobFailed,
    PrintJobCancelled,
    PrintJobTimeout,
    ArtifactNotFound,
    DistributionFailure,
    InvalidRequest,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable code exposed to callers.
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::GeometryInvalid => "GEOMETRY_INVALID",
            ErrorKind::ViewUnavailable => "VIEW_UNAVAILABLE",
            ErrorKind::WriteFailure => "WRITE_FAILURE",
            ErrorKind::ArtifactMissing => "ARTIFACT_MISSING",
            ErrorKind::PrintJobFailed => "PRINT_JOB_FAILED",
            ErrorKind::PrintJobCancelled => "PRINT_JOB_CANCELLED",
            ErrorKind::PrintJobTimeout => "PRINT_JOB_TIMEOUT",
            ErrorKind::ArtifactNotFound => "ARTIFACT_NOT_FOUND",
            ErrorKind::DistributionFailure => "DISTRIBUTION_FAILURE",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Cancellations are outcomes the user chose, not errors to present.
    pub const fn is_cancellation(self) -> bool {
        matches!(self, ErrorKind::Cancelled | ErrorKind::PrintJobCancelled)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::GeometryInvalid(_) => ErrorKind::GeometryInvalid,
            PipelineError::ViewUnavailable => ErrorKind::ViewUnavailable,
            PipelineError::WriteFailure { .. } => ErrorKind::WriteFailure,
            PipelineError::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            PipelineError::PrintJobFailed { .. } => ErrorKind::PrintJobFailed,
            PipelineError::PrintJobCancelled { .. } => ErrorKind::PrintJobCancelled,
            PipelineError::PrintJobTimeout { .. } => ErrorKind::PrintJobTimeout,
            PipelineError::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            PipelineError::DistributionFailure(_) => ErrorKind::DistributionFailure,
            PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ComposeError> for PipelineError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Geometry(err) => PipelineError::GeometryInvalid(err),
            ComposeError::Write {
                destination,
                source,
            } => PipelineError::WriteFailure {
                destination,
                source,
            },
            ComposeError::Cancelled => PipelineError::Cancelled,
            ComposeError::EmptyDocument => {
                PipelineError::Internal(ComposeError::EmptyDocument.to_string())
            }
        }
    }
}

impl From<ScriptError> for PipelineError {
    fn from(err: ScriptError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::InvalidRequest(err.to_string())
    }
}

/// Exactly-once answer to a caller.
/// 對呼叫端的唯一回覆。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallReply {
    Resolve(RenderResponse),
    Reject {
        code: &'static str,
        message: String,
        cancelled: bool,
    },
}

impl CallReply {
    /// Consumes a pipeline result; the reply can only be produced once.
    pub fn from_result(result: Result<RenderResponse, PipelineError>) -> Self {
        match result {
            Ok(response) => CallReply::Resolve(response),
            Err(err) => {
                let kind = err.kind();
                CallReply::Reject {
                    code: kind.code(),
                    message: err.to_string(),
                    cancelled: kind.is_cancellation(),
                }
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CallReply::Resolve(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            PipelineError::ArtifactNotFound(PathBuf::from("/x.pdf")).kind().code(),
            "ARTIFACT_NOT_FOUND"
        );
        assert_eq!(
            PipelineError::PrintJobTimeout {
                job: "j".into(),
                waited: Duration::from_secs(1)
            }
            .kind()
            .code(),
            "PRINT_JOB_TIMEOUT"
        );
    }

    #[test]
    fn cancellations_are_flagged() {
        assert!(ErrorKind::Cancelled.is_cancellation());
        assert!(ErrorKind::PrintJobCancelled.is_cancellation());
        assert!(!ErrorKind::PrintJobFailed.is_cancellation());
    }

    #[test]
    fn compose_errors_map_to_pipeline_kinds() {
        let err: PipelineError = ComposeError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let err: PipelineError = ComposeError::EmptyDocument.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        let err: PipelineError = ComposeError::Write {
            destination: PathBuf::from("/mirror/out.pdf"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
        assert!(err.to_string().contains("/mirror/out.pdf"));
    }

    #[test]
    fn reply_serializes_with_status_tag() {
        let reply = CallReply::from_result(Err(PipelineError::PrintJobCancelled {
            job: "doc".into(),
        }));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "reject");
        assert_eq!(json["code"], "PRINT_JOB_CANCELLED");
        assert_eq!(json["cancelled"], true);

        let reply = CallReply::from_result(Ok(RenderResponse {
            success: true,
            path: Some(PathBuf::from("/tmp/doc_1.pdf")),
            message: "PDF generated".into(),
        }));
        assert!(reply.is_resolved());
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "resolve");
        assert_eq!(json["success"], true);
        assert_eq!(json["path"], "/tmp/doc_1.pdf");
    }
}

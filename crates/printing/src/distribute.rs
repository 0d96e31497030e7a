use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub const PDF_MIME_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("artifact {0} does not exist")]
    MissingArtifact(PathBuf),
    #[error("failed to prepare outbox {path}: {source}")]
    Outbox {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to record share metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// What to hand to the distribution mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareRequest {
    pub path: PathBuf,
    pub title: String,
    pub mime_type: String,
}

/// External mechanism that hands an artifact to the user (share sheet,
/// mail, outbox, ...).
/// 將文件交給使用者的外部分享機制。
pub trait Distributor: Send + Sync {
    fn share(&self, request: &ShareRequest) -> Result<(), DistributionError>;
}

/// Copies shared artifacts into an outbox directory and records the share
/// metadata in a `<file>.share.json` sidecar.
#[derive(Debug, Clone)]
pub struct DirectoryDistributor {
    outbox: PathBuf,
}

impl DirectoryDistributor {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }
}

impl Distributor for DirectoryDistributor {
    fn share(&self, request: &ShareRequest) -> Result<(), DistributionError> {
        if !request.path.is_file() {
            return Err(DistributionError::MissingArtifact(request.path.clone()));
        }
        fs::create_dir_all(&self.outbox).map_err(|source| DistributionError::Outbox {
            path: self.outbox.clone(),
            source,
        })?;
        let file_name = request
            .path
            .file_name()
            .ok_or_else(|| DistributionError::MissingArtifact(request.path.clone()))?;
        let target = self.outbox.join(file_name);
        fs::copy(&request.path, &target).map_err(|source| DistributionError::Copy {
            from: request.path.clone(),
            to: target.clone(),
            source,
        })?;

        let mut sidecar_name = file_name.to_os_string();
        sidecar_name.push(".share.json");
        let sidecar = self.outbox.join(sidecar_name);
        let metadata = serde_json::to_vec_pretty(request)?;
        fs::write(&sidecar, metadata).map_err(|source| DistributionError::Copy {
            from: request.path.clone(),
            to: sidecar.clone(),
            source,
        })?;

        info!(
            path = %request.path.display(),
            outbox = %self.outbox.display(),
            title = %request.title,
            "artifact shared"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_artifact_and_writes_sidecar() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("doc_1.pdf");
        fs::write(&artifact, b"%PDF-1.4").unwrap();
        let outbox = dir.path().join("outbox");
        let request = ShareRequest {
            path: artifact,
            title: "Share PDF".into(),
            mime_type: PDF_MIME_TYPE.into(),
        };

        DirectoryDistributor::new(&outbox).share(&request).unwrap();

        assert_eq!(fs::read(outbox.join("doc_1.pdf")).unwrap(), b"%PDF-1.4");
        let sidecar: serde_json::Value =
            serde_json::from_slice(&fs::read(outbox.join("doc_1.pdf.share.json")).unwrap())
                .unwrap();
        assert_eq!(sidecar["mime_type"], "application/pdf");
        assert_eq!(sidecar["title"], "Share PDF");
    }

    #[test]
    fn missing_artifact_is_rejected() {
        let dir = tempdir().unwrap();
        let request = ShareRequest {
            path: dir.path().join("absent.pdf"),
            title: "Share PDF".into(),
            mime_type: PDF_MIME_TYPE.into(),
        };
        let err = DirectoryDistributor::new(dir.path().join("outbox"))
            .share(&request)
            .unwrap_err();
        assert!(matches!(err, DistributionError::MissingArtifact(_)));
    }
}

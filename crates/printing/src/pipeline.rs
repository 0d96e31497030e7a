use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bracket::StyleBracket;
use crate::composer::{ComposeTargets, DocumentArtifact, DocumentComposer};
use crate::config::PipelineConfig;
use crate::distribute::{Distributor, ShareRequest};
use crate::error::PipelineError;
use crate::monitor::PrintJobMonitor;
use crate::platform::PrintService;
use crate::store::ArtifactStore;
use crate::view::ViewSurface;

/// What the caller wants done with the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    ShareAfterRender,
    RenderOnly,
    ShareExistingArtifact,
    SystemPrint,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderMode::ShareAfterRender => "share-after-render",
            RenderMode::RenderOnly => "render-only",
            RenderMode::ShareExistingArtifact => "share-existing",
            RenderMode::SystemPrint => "system-print",
        };
        f.write_str(name)
    }
}

/// Mode together with the data only that mode needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    ShareAfterRender,
    RenderOnly,
    ShareExistingArtifact { path: PathBuf },
    SystemPrint,
}

impl RenderTarget {
    pub fn mode(&self) -> RenderMode {
        match self {
            RenderTarget::ShareAfterRender => RenderMode::ShareAfterRender,
            RenderTarget::RenderOnly => RenderMode::RenderOnly,
            RenderTarget::ShareExistingArtifact { .. } => RenderMode::ShareExistingArtifact,
            RenderTarget::SystemPrint => RenderMode::SystemPrint,
        }
    }
}

/// A single caller request.
/// 呼叫端送出的單一請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub base_name: Option<String>,
    pub title: Option<String>,
    pub target: RenderTarget,
}

impl RenderRequest {
    pub fn new(base_name: Option<String>, target: RenderTarget) -> Self {
        Self {
            base_name,
            title: None,
            target,
        }
    }

    pub fn share(base_name: impl Into<String>) -> Self {
        Self::new(Some(base_name.into()), RenderTarget::ShareAfterRender)
    }

    pub fn render_only(base_name: impl Into<String>) -> Self {
        Self::new(Some(base_name.into()), RenderTarget::RenderOnly)
    }

    pub fn share_existing(path: impl Into<PathBuf>) -> Self {
        Self::new(
            None,
            RenderTarget::ShareExistingArtifact { path: path.into() },
        )
    }

    pub fn system_print(base_name: impl Into<String>) -> Self {
        Self::new(Some(base_name.into()), RenderTarget::SystemPrint)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builds a request from loosely typed caller input. `source_path` is
    /// required for, and only accepted by, [`RenderMode::ShareExistingArtifact`].
    pub fn from_parts(
        base_name: Option<String>,
        mode: RenderMode,
        source_path: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let source_path = source_path.filter(|path| !path.as_os_str().is_empty());
        let target = match (mode, source_path) {
            (RenderMode::ShareExistingArtifact, Some(path)) => {
                RenderTarget::ShareExistingArtifact { path }
            }
            (RenderMode::ShareExistingArtifact, None) => {
                return Err(PipelineError::InvalidRequest(
                    "PDF path is required".to_string(),
                ))
            }
            (mode, Some(_)) => {
                return Err(PipelineError::InvalidRequest(format!(
                    "a source path is not accepted in {mode} mode"
                )))
            }
            (RenderMode::ShareAfterRender, None) => RenderTarget::ShareAfterRender,
            (RenderMode::RenderOnly, None) => RenderTarget::RenderOnly,
            (RenderMode::SystemPrint, None) => RenderTarget::SystemPrint,
        };
        Ok(Self::new(base_name, target))
    }

    pub fn mode(&self) -> RenderMode {
        self.target.mode()
    }
}

/// Successful answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderResponse {
    pub success: bool,
    pub path: Option<PathBuf>,
    pub message: String,
}

impl RenderResponse {
    fn ok(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            path,
            message: message.into(),
        }
    }
}

/// Orchestrates render, share and print requests against one bound view.
/// 針對單一檢視協調產生、分享與列印請求的管線。
pub struct Pipeline<S, D> {
    view: Option<Arc<dyn ViewSurface>>,
    view_gate: Mutex<()>,
    store: ArtifactStore,
    bracket: StyleBracket,
    composer: DocumentComposer,
    monitor: PrintJobMonitor<S>,
    distributor: D,
    config: PipelineConfig,
}

impl<S: PrintService, D: Distributor> Pipeline<S, D> {
    pub fn new(
        config: PipelineConfig,
        view: Option<Arc<dyn ViewSurface>>,
        service: Arc<S>,
        distributor: D,
    ) -> Self {
        let store = ArtifactStore::new(
            config.scratch_dir.clone(),
            config.extension.clone(),
            config.default_base_name.clone(),
        );
        let bracket = StyleBracket::new(config.bracket_options());
        let composer = DocumentComposer::new(config.page_spec(), config.page.placement);
        let monitor = PrintJobMonitor::new(service, config.monitor_options());
        Self {
            view,
            view_gate: Mutex::new(()),
            store,
            bracket,
            composer,
            monitor,
            distributor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn monitor(&self) -> &PrintJobMonitor<S> {
        &self.monitor
    }

    pub async fn run(&self, request: RenderRequest) -> Result<RenderResponse, PipelineError> {
        self.run_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        request: RenderRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, PipelineError> {
        let mode = request.mode();
        let span = info_span!("render", %mode, base = request.base_name.as_deref().unwrap_or(""));
        async move {
            let RenderRequest {
                base_name,
                title,
                target,
            } = request;
            let base = base_name.as_deref();
            let title = title.as_deref();
            let result = match target {
                RenderTarget::ShareAfterRender => self.share_after_render(base, title, cancel).await,
                RenderTarget::RenderOnly => self.render_only(base, title, cancel).await,
                RenderTarget::ShareExistingArtifact { path } => {
                    self.share_existing(&path, title).await
                }
                RenderTarget::SystemPrint => self.system_print(base, title, cancel).await,
            };
            match &result {
                Ok(response) => info!(path = ?response.path, "request resolved"),
                Err(err) => info!(code = err.kind().code(), error = %err, "request rejected"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Manual, idempotent restore of the bound view.
    pub async fn restore_view(&self) -> Result<RenderResponse, PipelineError> {
        let view = self.bound_view()?;
        let _gate = self.view_gate.lock().await;
        self.bracket.restore(view.as_ref()).await;
        Ok(RenderResponse::ok(None, "Page restored"))
    }

    async fn share_after_render(
        &self,
        base: Option<&str>,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, PipelineError> {
        let store = self.store.clone();
        let retention = self.config.retention();
        match tokio::task::spawn_blocking(move || store.sweep(retention)).await {
            Ok(report) => {
                debug!(deleted = report.deleted, failed = report.failed, "scratch sweep done")
            }
            Err(err) => warn!(error = %err, "scratch sweep task failed"),
        }

        let primary = self.allocate(base)?;
        let secondary = self.config.mirror_dir.as_ref().and_then(|dir| {
            primary
                .file_name()
                .map(|file_name| dir.join(file_name))
        });
        let artifact = self
            .capture(ComposeTargets { primary, secondary }, title, cancel)
            .await?;
        self.distribute(&artifact.path, title)?;
        Ok(RenderResponse::ok(
            Some(artifact.path),
            "PDF generated and shared",
        ))
    }

    async fn render_only(
        &self,
        base: Option<&str>,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, PipelineError> {
        let primary = self.allocate(base)?;
        let artifact = self
            .capture(ComposeTargets::single(primary), title, cancel)
            .await?;
        Ok(RenderResponse::ok(Some(artifact.path), "PDF generated"))
    }

    async fn share_existing(
        &self,
        path: &Path,
        title: Option<&str>,
    ) -> Result<RenderResponse, PipelineError> {
        let exists = tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !exists {
            return Err(PipelineError::ArtifactNotFound(path.to_path_buf()));
        }
        self.distribute(path, title)?;
        Ok(RenderResponse::ok(
            Some(path.to_path_buf()),
            "PDF shared",
        ))
    }

    async fn system_print(
        &self,
        base: Option<&str>,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RenderResponse, PipelineError> {
        let view = self.bound_view()?;
        let job_name = self.store.generate_stem(base);
        let attributes = self.config.page_attributes();
        let handle = {
            let _gate = self.view_gate.lock().await;
            self.monitor.submit(view.as_ref(), &job_name, &attributes)?
        };
        self.monitor.await_terminal(&handle, cancel).await?;
        let path = self.monitor.locate_artifact(&job_name).await?;
        self.distribute(&path, title)?;
        Ok(RenderResponse::ok(Some(path), "PDF printed and shared"))
    }

    /// Prepare, paint and restore under the view gate, then write the file
    /// on the blocking pool.
    async fn capture(
        &self,
        targets: ComposeTargets,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DocumentArtifact, PipelineError> {
        let view = self.bound_view()?;
        let rendered = {
            let _gate = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                gate = self.view_gate.lock() => gate,
            };

            let guard = self.bracket.enter(Arc::clone(&view), cancel).await;
            let rendered = self.composer.render(view.as_ref(), title, cancel);
            guard.restore().await;
            rendered?
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let artifact = tokio::task::spawn_blocking(move || rendered.persist(&targets))
            .await
            .map_err(|err| PipelineError::Internal(format!("document write task failed: {err}")))??;
        Ok(artifact)
    }

    fn distribute(&self, path: &Path, title: Option<&str>) -> Result<(), PipelineError> {
        let request = ShareRequest {
            path: path.to_path_buf(),
            title: title.unwrap_or(&self.config.share.title).to_string(),
            mime_type: self.config.share.mime_type.clone(),
        };
        self.distributor.share(&request)?;
        Ok(())
    }

    fn allocate(&self, base: Option<&str>) -> Result<PathBuf, PipelineError> {
        self.store
            .allocate(base)
            .map_err(|source| PipelineError::WriteFailure {
                destination: self.store.dir().to_path_buf(),
                source,
            })
    }

    fn bound_view(&self) -> Result<Arc<dyn ViewSurface>, PipelineError> {
        self.view.clone().ok_or(PipelineError::ViewUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn share_existing_requires_path() {
        let err = RenderRequest::from_parts(None, RenderMode::ShareExistingArtifact, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.to_string(), "invalid request: PDF path is required");

        let empty = RenderRequest::from_parts(
            None,
            RenderMode::ShareExistingArtifact,
            Some(PathBuf::new()),
        );
        assert!(empty.is_err());
    }

    #[test]
    fn other_modes_reject_source_path() {
        let err = RenderRequest::from_parts(
            Some("doc".into()),
            RenderMode::RenderOnly,
            Some(PathBuf::from("/tmp/x.pdf")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn parts_map_to_targets() {
        let request =
            RenderRequest::from_parts(Some("doc".into()), RenderMode::SystemPrint, None).unwrap();
        assert_eq!(request.target, RenderTarget::SystemPrint);
        let request = RenderRequest::from_parts(
            None,
            RenderMode::ShareExistingArtifact,
            Some(PathBuf::from("/tmp/x.pdf")),
        )
        .unwrap();
        assert_eq!(request.mode(), RenderMode::ShareExistingArtifact);
        assert_eq!(RenderMode::ShareAfterRender.to_string(), "share-after-render");
    }
}

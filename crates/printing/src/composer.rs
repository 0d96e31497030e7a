use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::display::PageSurface;
use crate::geometry::{compute_in, GeometryError, PageGeometry, PageSpec, Placement, PrintableArea};
use crate::pdf::{PdfDocument, PdfError, PdfOptions};
use crate::view::ViewSurface;

/// Errors raised while composing a document.
/// 組合文件時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("failed to write {destination}: {source}")]
    Write {
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("composition cancelled")]
    Cancelled,
    #[error("document serialized without pages")]
    EmptyDocument,
}

impl From<PdfError> for ComposeError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Empty => ComposeError::EmptyDocument,
        }
    }
}

/// Where a composed document is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTargets {
    pub primary: PathBuf,
    /// Optional mirror; both succeed or neither is kept.
    pub secondary: Option<PathBuf>,
}

impl ComposeTargets {
    pub fn single(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }
}

/// A composed, persisted document.
/// 已組合並寫入的文件。
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentArtifact {
    pub path: PathBuf,
    pub byte_length: u64,
    pub created_at: SystemTime,
    pub page_count: u32,
    pub geometry: PageGeometry,
    pub mirrored_to: Option<PathBuf>,
}

/// Paints a live view onto a single fixed-size page.
/// 將即時檢視繪製成單一固定尺寸頁面。
#[derive(Debug, Clone)]
pub struct DocumentComposer {
    page: PageSpec,
    placement: Placement,
    pdf: PdfOptions,
}

impl DocumentComposer {
    pub fn new(page: PageSpec, placement: Placement) -> Self {
        Self {
            page,
            placement,
            pdf: PdfOptions::default(),
        }
    }

    pub fn with_pdf_options(mut self, pdf: PdfOptions) -> Self {
        self.pdf = pdf;
        self
    }

    pub fn page(&self) -> PageSpec {
        self.page
    }

    /// Composes `view` into a one-page document and writes it to `targets`.
    pub fn compose(
        &self,
        view: &dyn ViewSurface,
        targets: &ComposeTargets,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DocumentArtifact, ComposeError> {
        let rendered = self.render(view, title, cancel)?;
        ensure_not_cancelled(cancel)?;
        rendered.persist(targets)
    }

    /// Paints `view` and serializes the page, without touching the disk.
    ///
    /// The caller must hold whatever exclusivity the view requires; painting
    /// happens synchronously on the calling thread.
    pub fn render(
        &self,
        view: &dyn ViewSurface,
        title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RenderedDocument, ComposeError> {
        let geometry = compute_in(
            view.width(),
            view.height(),
            PrintableArea::full(self.page),
            self.placement,
        )?;
        if geometry.used_fallback {
            debug!(
                reported_width = view.width(),
                reported_height = view.height(),
                "view not laid out; using fallback size"
            );
        }

        ensure_not_cancelled(cancel)?;
        let mut options = self.pdf.clone();
        if let Some(title) = title {
            options.title = Some(title.to_string());
        }
        let mut document = PdfDocument::new(options);
        let mut surface = PageSurface::new(self.page);
        surface.translate(geometry.origin.x, geometry.origin.y);
        surface.scale(geometry.scale);

        ensure_not_cancelled(cancel)?;
        view.paint_into(&mut surface);
        debug!(
            commands = surface.display_list().drawing_len(),
            scale = geometry.scale,
            "view painted"
        );
        document.finish_page(surface);

        ensure_not_cancelled(cancel)?;
        let bytes = document.to_bytes()?;
        Ok(RenderedDocument {
            page_count: document.page_count() as u32,
            bytes,
            geometry,
        })
    }
}

/// Serialized document waiting to be written.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    bytes: Vec<u8>,
    page_count: u32,
    geometry: PageGeometry,
}

impl RenderedDocument {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Blocking writes to the primary and optional mirror destination.
    pub fn persist(self, targets: &ComposeTargets) -> Result<DocumentArtifact, ComposeError> {
        write_atomic(&targets.primary, &self.bytes).map_err(|source| ComposeError::Write {
            destination: targets.primary.clone(),
            source,
        })?;

        if let Some(secondary) = &targets.secondary {
            if let Err(source) = write_atomic(secondary, &self.bytes) {
                if let Err(err) = fs::remove_file(&targets.primary) {
                    warn!(
                        path = %targets.primary.display(),
                        error = %err,
                        "failed to remove primary after mirror write failure"
                    );
                }
                return Err(ComposeError::Write {
                    destination: secondary.clone(),
                    source,
                });
            }
        }

        info!(
            path = %targets.primary.display(),
            bytes = self.bytes.len(),
            mirrored = targets.secondary.is_some(),
            "document composed"
        );
        Ok(DocumentArtifact {
            path: targets.primary.clone(),
            byte_length: self.bytes.len() as u64,
            created_at: SystemTime::now(),
            page_count: self.page_count,
            geometry: self.geometry,
            mirrored_to: targets.secondary.clone(),
        })
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), ComposeError> {
    if cancel.is_cancelled() {
        return Err(ComposeError::Cancelled);
    }
    Ok(())
}

/// Writes `bytes` next to `path` and renames into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneView;
    use tempfile::tempdir;

    fn view() -> SceneView {
        SceneView::from_json(
            r#"{ "width": 800, "height": 1200, "elements": [
                { "id": "t", "kind": "text", "x": 10, "y": 10, "text": "hello" }
            ] }"#,
            None,
        )
        .unwrap()
    }

    #[test]
    fn composes_single_page_to_primary() {
        let dir = tempdir().unwrap();
        let composer = DocumentComposer::new(PageSpec::A4, Placement::Origin);
        let targets = ComposeTargets::single(dir.path().join("out.pdf"));
        let artifact = composer
            .compose(&view(), &targets, Some("Report"), &CancellationToken::new())
            .unwrap();

        assert_eq!(artifact.page_count, 1);
        assert!((artifact.geometry.scale - 842.0 / 1200.0).abs() < 1e-6);
        let bytes = fs::read(&artifact.path).unwrap();
        assert_eq!(bytes.len() as u64, artifact.byte_length);
        assert!(bytes.starts_with(b"%PDF-"));
        assert!(!dir.path().join("out.pdf.tmp").exists());
    }

    #[test]
    fn render_leaves_disk_untouched_until_persist() {
        let dir = tempdir().unwrap();
        let composer = DocumentComposer::new(PageSpec::A4, Placement::Origin);
        let rendered = composer
            .render(&view(), None, &CancellationToken::new())
            .unwrap();
        assert!(!rendered.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let length = rendered.len() as u64;
        let artifact = rendered
            .persist(&ComposeTargets::single(dir.path().join("late.pdf")))
            .unwrap();
        assert_eq!(artifact.byte_length, length);
        assert!(dir.path().join("late.pdf").exists());
    }

    #[test]
    fn mirror_receives_identical_bytes() {
        let dir = tempdir().unwrap();
        let targets = ComposeTargets {
            primary: dir.path().join("a/out.pdf"),
            secondary: Some(dir.path().join("b/out.pdf")),
        };
        let artifact = DocumentComposer::new(PageSpec::A4, Placement::Centered)
            .compose(&view(), &targets, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(artifact.mirrored_to.as_deref(), targets.secondary.as_deref());
        assert_eq!(
            fs::read(&targets.primary).unwrap(),
            fs::read(targets.secondary.as_ref().unwrap()).unwrap()
        );
    }

    #[test]
    fn failed_mirror_removes_primary() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a dir").unwrap();
        let targets = ComposeTargets {
            primary: dir.path().join("out.pdf"),
            secondary: Some(blocker.join("out.pdf")),
        };
        let err = DocumentComposer::new(PageSpec::A4, Placement::Origin)
            .compose(&view(), &targets, None, &CancellationToken::new())
            .unwrap_err();
        match err {
            ComposeError::Write { destination, .. } => {
                assert_eq!(Some(destination), targets.secondary)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!targets.primary.exists());
    }

    #[test]
    fn cancelled_token_writes_nothing() {
        let dir = tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let targets = ComposeTargets::single(dir.path().join("out.pdf"));
        let err = DocumentComposer::new(PageSpec::A4, Placement::Origin)
            .compose(&view(), &targets, None, &cancel)
            .unwrap_err();
        assert!(matches!(err, ComposeError::Cancelled));
        assert!(!targets.primary.exists());
    }
}

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composer::write_atomic;
use crate::config::PipelineConfig;
use crate::display::PageSurface;
use crate::job::{JobHandle, PageAttributes, PrintJobId, PrintJobState};
use crate::pdf::{PdfDocument, PdfOptions};
use crate::platform::PrintService;
use crate::view::{AdapterError, PrintDocumentAdapter};

const CANCEL_POLL: Duration = Duration::from_millis(10);

/// How long a finished job stays queryable.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("failed to create spool directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start spool worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("unknown print job {0}")]
    UnknownJob(PrintJobId),
}

#[derive(Debug)]
struct SpoolEntry {
    state: PrintJobState,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

type JobTable = Arc<Mutex<HashMap<PrintJobId, SpoolEntry>>>;

/// Print service that renders each job to `<dir>/<job_name>.<ext>` on a
/// worker thread. Finished jobs are forgotten once the retention window passes.
/// 於背景執行緒將列印作業輸出為 PDF 的列印服務。
#[derive(Debug, Clone)]
pub struct SpoolPrintService {
    dir: PathBuf,
    jobs: JobTable,
    latency: Duration,
    extension: String,
    retention: Duration,
}

impl SpoolPrintService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            jobs: Arc::default(),
            latency: Duration::ZERO,
            extension: "pdf".to_string(),
            retention: DEFAULT_JOB_RETENTION,
        }
    }

    /// Spool directory and file extension taken from the pipeline config, so
    /// spooled files land where [`crate::PrintJobMonitor`] looks for them.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.spool_dir()).with_extension(config.extension.clone())
    }

    /// Extension of spooled files, without the dot.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Delays every job before rendering starts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, job_name: &str) -> PathBuf {
        self.dir.join(format!("{job_name}.{}", self.extension))
    }

    /// Number of jobs still tracked.
    pub fn tracked_jobs(&self) -> usize {
        lock(&self.jobs).len()
    }

    fn evict_finished(&self) {
        let retention = self.retention;
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |finished| finished.elapsed() < retention)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, "finished spool jobs evicted");
        }
    }
}

impl PrintService for SpoolPrintService {
    type Error = SpoolError;

    fn submit(
        &self,
        job_name: &str,
        adapter: Box<dyn PrintDocumentAdapter>,
        attributes: &PageAttributes,
    ) -> Result<JobHandle, Self::Error> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SpoolError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        self.evict_finished();
        let handle = JobHandle::new(job_name);
        let cancel = CancellationToken::new();
        lock(&self.jobs).insert(
            handle.id,
            SpoolEntry {
                state: PrintJobState::Pending,
                cancel: cancel.clone(),
                finished_at: None,
            },
        );

        let worker = SpoolWorker {
            id: handle.id,
            output: self.artifact_path(job_name),
            attributes: attributes.clone(),
            latency: self.latency,
            jobs: Arc::clone(&self.jobs),
            cancel,
        };
        let spawned = thread::Builder::new()
            .name(format!("spool-{}", handle.id.value()))
            .spawn(move || worker.run(adapter));
        if let Err(err) = spawned {
            lock(&self.jobs).remove(&handle.id);
            return Err(SpoolError::Spawn(err));
        }

        info!(job = %handle, "print job spooled");
        Ok(handle)
    }

    fn query_state(&self, handle: &JobHandle) -> Result<PrintJobState, Self::Error> {
        self.evict_finished();
        lock(&self.jobs)
            .get(&handle.id)
            .map(|entry| entry.state.clone())
            .ok_or(SpoolError::UnknownJob(handle.id))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), Self::Error> {
        let jobs = lock(&self.jobs);
        let entry = jobs
            .get(&handle.id)
            .ok_or(SpoolError::UnknownJob(handle.id))?;
        if !entry.state.is_terminal() {
            debug!(job = %handle, "cancelling spooled job");
            entry.cancel.cancel();
        }
        Ok(())
    }
}

struct SpoolWorker {
    id: PrintJobId,
    output: PathBuf,
    attributes: PageAttributes,
    latency: Duration,
    jobs: JobTable,
    cancel: CancellationToken,
}

impl SpoolWorker {
    fn run(self, mut adapter: Box<dyn PrintDocumentAdapter>) {
        let state = match self.render(adapter.as_mut()) {
            Ok(()) => PrintJobState::Completed,
            Err(AdapterError::Cancelled) => PrintJobState::Cancelled,
            Err(err) => {
                warn!(job = %self.id, error = %err, "spooled job failed");
                PrintJobState::Failed(err.to_string())
            }
        };
        adapter.on_finish();
        debug!(job = %self.id, ?state, "spool worker finished");
        if let Some(entry) = lock(&self.jobs).get_mut(&self.id) {
            entry.state = state;
            entry.finished_at = Some(Instant::now());
        }
    }

    fn render(&self, adapter: &mut dyn PrintDocumentAdapter) -> Result<(), AdapterError> {
        self.wait_latency()?;
        let info = adapter.on_layout(&self.attributes)?;
        let mut document = PdfDocument::new(PdfOptions {
            title: Some(info.name.clone()),
            color_mode: self.attributes.color_mode,
            ..PdfOptions::default()
        });
        for index in 0..info.page_count {
            self.check_cancel()?;
            let mut surface = PageSurface::new(self.attributes.page_spec());
            adapter.on_write_page(index, &mut surface)?;
            document.finish_page(surface);
        }
        self.check_cancel()?;
        let bytes = document.to_bytes().map_err(|err| AdapterError::Write {
            page: 0,
            reason: err.to_string(),
        })?;
        write_atomic(&self.output, &bytes).map_err(|err| AdapterError::Write {
            page: info.page_count,
            reason: format!("{}: {err}", self.output.display()),
        })
    }

    fn wait_latency(&self) -> Result<(), AdapterError> {
        let started = Instant::now();
        while started.elapsed() < self.latency {
            self.check_cancel()?;
            let remaining = self.latency.saturating_sub(started.elapsed());
            thread::sleep(remaining.min(CANCEL_POLL));
        }
        self.check_cancel()
    }

    fn check_cancel(&self) -> Result<(), AdapterError> {
        if self.cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneView;
    use crate::view::ViewSurface;
    use tempfile::tempdir;

    fn wait_terminal(service: &SpoolPrintService, handle: &JobHandle) -> PrintJobState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = service.query_state(handle).unwrap();
            if state.is_terminal() || Instant::now() > deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn scene() -> SceneView {
        SceneView::from_json(
            r#"{ "width": 300, "height": 200, "elements": [
                { "id": "t", "kind": "text", "text": "spooled" }
            ] }"#,
            None,
        )
        .unwrap()
    }

    #[test]
    fn renders_job_to_named_pdf() {
        let dir = tempdir().unwrap();
        let service = SpoolPrintService::new(dir.path());
        let handle = service
            .submit("invoice", scene().create_print_adapter("invoice"), &PageAttributes::default())
            .unwrap();
        assert_eq!(wait_terminal(&service, &handle), PrintJobState::Completed);
        let bytes = std::fs::read(dir.path().join("invoice.pdf")).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn cancellation_during_latency_is_reported() {
        let dir = tempdir().unwrap();
        let service = SpoolPrintService::new(dir.path()).with_latency(Duration::from_secs(5));
        let handle = service
            .submit("slow", scene().create_print_adapter("slow"), &PageAttributes::default())
            .unwrap();
        service.cancel(&handle).unwrap();
        assert_eq!(wait_terminal(&service, &handle), PrintJobState::Cancelled);
        assert!(!dir.path().join("slow.pdf").exists());
    }

    #[test]
    fn impossible_margins_fail_the_job() {
        let dir = tempdir().unwrap();
        let service = SpoolPrintService::new(dir.path());
        let attributes = PageAttributes {
            margins: crate::job::Margin::uniform(500.0),
            ..PageAttributes::default()
        };
        let handle = service
            .submit("bad", scene().create_print_adapter("bad"), &attributes)
            .unwrap();
        assert!(matches!(wait_terminal(&service, &handle), PrintJobState::Failed(_)));
    }

    #[test]
    fn finished_jobs_are_evicted_after_retention() {
        let dir = tempdir().unwrap();
        let service = SpoolPrintService::new(dir.path()).with_retention(Duration::from_millis(200));
        let first = service
            .submit("first", scene().create_print_adapter("first"), &PageAttributes::default())
            .unwrap();
        assert_eq!(wait_terminal(&service, &first), PrintJobState::Completed);
        thread::sleep(Duration::from_millis(300));

        let second = service
            .submit("second", scene().create_print_adapter("second"), &PageAttributes::default())
            .unwrap();
        assert!(matches!(
            service.query_state(&first),
            Err(SpoolError::UnknownJob(_))
        ));
        assert_eq!(wait_terminal(&service, &second), PrintJobState::Completed);
        assert_eq!(service.tracked_jobs(), 1);
    }

    #[test]
    fn spooled_file_uses_configured_extension() {
        let dir = tempdir().unwrap();
        let service = SpoolPrintService::new(dir.path()).with_extension("out");
        assert_eq!(service.artifact_path("memo"), dir.path().join("memo.out"));
        let handle = service
            .submit("memo", scene().create_print_adapter("memo"), &PageAttributes::default())
            .unwrap();
        assert_eq!(wait_terminal(&service, &handle), PrintJobState::Completed);
        assert!(dir.path().join("memo.out").exists());
        assert!(!dir.path().join("memo.pdf").exists());
    }

    #[test]
    fn unknown_jobs_are_errors() {
        let service = SpoolPrintService::new("unused");
        let handle = JobHandle::new("ghost");
        assert!(matches!(
            service.query_state(&handle),
            Err(SpoolError::UnknownJob(_))
        ));
    }
}

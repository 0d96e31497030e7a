use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::job::{JobHandle, PageAttributes, PrintJobState};
use crate::platform::PrintService;
use crate::view::ViewSurface;

/// Exponential backoff for state polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Bounded existence check for an artifact that may appear late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactLookup {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ArtifactLookup {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    pub poll: PollPolicy,
    pub lookup: ArtifactLookup,
    /// Directory where the print service leaves `<job_name>.<ext>`.
    pub artifact_dir: PathBuf,
    pub extension: String,
}

/// Drives a print job from submission to a discovered artifact.
/// 追蹤列印作業直到找到輸出檔案。
pub struct PrintJobMonitor<S> {
    service: Arc<S>,
    options: MonitorOptions,
}

impl<S: PrintService> PrintJobMonitor<S> {
    pub fn new(service: Arc<S>, options: MonitorOptions) -> Self {
        Self { service, options }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn expected_artifact(&self, job_name: &str) -> PathBuf {
        self.options
            .artifact_dir
            .join(format!("{job_name}.{}", self.options.extension))
    }

    pub fn submit(
        &self,
        view: &dyn ViewSurface,
        job_name: &str,
        attributes: &PageAttributes,
    ) -> Result<JobHandle, PipelineError> {
        let adapter = view.create_print_adapter(job_name);
        let handle = self
            .service
            .submit(job_name, adapter, attributes)
            .map_err(|err| PipelineError::PrintJobFailed {
                job: job_name.to_string(),
                reason: format!("submission rejected: {err}"),
            })?;
        info!(job = %handle, media = ?attributes.media, "print job submitted");
        Ok(handle)
    }

    /// Polls on a background task until the job is terminal, the policy
    /// times out or `cancel` fires. Returns once the job completed.
    pub async fn await_terminal(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let token = cancel.child_token();
        // Stops the poll task if this future is dropped early.
        let _stop_on_drop = token.clone().drop_guard();
        let task = tokio::spawn(poll_until_terminal(
            Arc::clone(&self.service),
            handle.clone(),
            self.options.poll,
            token,
        ));
        match task.await {
            Ok(result) => result,
            Err(err) => Err(PipelineError::Internal(format!("poll task aborted: {err}"))),
        }
    }

    /// Looks for the job's artifact, retrying while it is not yet visible.
    pub async fn locate_artifact(&self, job_name: &str) -> Result<PathBuf, PipelineError> {
        let expected = self.expected_artifact(job_name);
        let attempts = self.options.lookup.attempts.max(1);
        for attempt in 1..=attempts {
            if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
                debug!(path = %expected.display(), attempt, "print artifact located");
                return Ok(expected);
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.lookup.delay).await;
            }
        }
        Err(PipelineError::ArtifactMissing {
            job: job_name.to_string(),
            expected,
        })
    }

    /// Submits, waits and locates in one call.
    pub async fn run(
        &self,
        view: &dyn ViewSurface,
        job_name: &str,
        attributes: &PageAttributes,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let handle = self.submit(view, job_name, attributes)?;
        self.await_terminal(&handle, cancel).await?;
        self.locate_artifact(job_name).await
    }
}

async fn poll_until_terminal<S: PrintService>(
    service: Arc<S>,
    handle: JobHandle,
    policy: PollPolicy,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let job = handle.name.clone();
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    loop {
        if cancel.is_cancelled() {
            return Err(cancel_at_service(service.as_ref(), &handle));
        }
        match service.query_state(&handle) {
            Ok(PrintJobState::Pending) => {}
            Ok(PrintJobState::Completed) => {
                info!(job = %handle, "print job completed");
                return Ok(());
            }
            Ok(PrintJobState::Failed(reason)) => {
                warn!(job = %handle, %reason, "print job failed");
                return Err(PipelineError::PrintJobFailed { job, reason });
            }
            Ok(PrintJobState::Cancelled) => {
                info!(job = %handle, "print job cancelled by the service");
                return Err(PipelineError::PrintJobCancelled { job });
            }
            Err(err) => {
                warn!(job = %handle, error = %err, "print job state query failed");
                return Err(PipelineError::PrintJobFailed {
                    job,
                    reason: format!("state query failed: {err}"),
                });
            }
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            warn!(job = %handle, ?waited, "print job timed out");
            if let Err(err) = service.cancel(&handle) {
                warn!(job = %handle, error = %err, "failed to cancel timed out job");
            }
            return Err(PipelineError::PrintJobTimeout { job, waited });
        }
        let pause = interval.min(policy.timeout - waited);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancel_at_service(service.as_ref(), &handle)),
            _ = tokio::time::sleep(pause) => {}
        }
        interval = policy.next_interval(interval);
    }
}

fn cancel_at_service<S: PrintService>(service: &S, handle: &JobHandle) -> PipelineError {
    info!(job = %handle, "cancelling print job on caller request");
    if let Err(err) = service.cancel(handle) {
        warn!(job = %handle, error = %err, "print service refused cancellation");
    }
    PipelineError::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::platform::ScriptedPrintService;
    use crate::scene::SceneView;
    use tempfile::tempdir;

    fn view() -> SceneView {
        SceneView::from_json(r#"{ "width": 100, "height": 100 }"#, None).unwrap()
    }

    fn monitor(
        service: ScriptedPrintService,
        dir: &std::path::Path,
        poll: PollPolicy,
    ) -> PrintJobMonitor<ScriptedPrintService> {
        PrintJobMonitor::new(
            Arc::new(service),
            MonitorOptions {
                poll,
                lookup: ArtifactLookup {
                    attempts: 3,
                    delay: Duration::from_millis(50),
                },
                artifact_dir: dir.to_path_buf(),
                extension: "pdf".into(),
            },
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = PollPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(300),
            timeout: Duration::from_secs(1),
        };
        let second = policy.next_interval(policy.initial_interval);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(policy.next_interval(second), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_job_resolves_to_artifact() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF").unwrap();
        let monitor = monitor(
            ScriptedPrintService::new([
                Ok(PrintJobState::Pending),
                Ok(PrintJobState::Pending),
                Ok(PrintJobState::Completed),
            ]),
            dir.path(),
            PollPolicy::default(),
        );
        let path = monitor
            .run(&view(), "scan", &PageAttributes::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("scan.pdf"));
        assert_eq!(monitor.service().query_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn service_cancellation_skips_lookup() {
        let dir = tempdir().unwrap();
        let monitor = monitor(
            ScriptedPrintService::new([Ok(PrintJobState::Pending), Ok(PrintJobState::Cancelled)]),
            dir.path(),
            PollPolicy::default(),
        );
        let err = monitor
            .run(&view(), "scan", &PageAttributes::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrintJobCancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reason_is_propagated() {
        let dir = tempdir().unwrap();
        let monitor = monitor(
            ScriptedPrintService::new([Ok(PrintJobState::Failed("paper jam".into()))]),
            dir.path(),
            PollPolicy::default(),
        );
        let err = monitor
            .run(&view(), "scan", &PageAttributes::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PrintJobFailed { ref reason, .. } if reason == "paper jam"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn query_errors_are_not_retried() {
        let dir = tempdir().unwrap();
        let monitor = monitor(
            ScriptedPrintService::new([Err("service gone".to_string())]),
            dir.path(),
            PollPolicy::default(),
        );
        let handle = monitor
            .submit(&view(), "scan", &PageAttributes::default())
            .unwrap();
        let err = monitor
            .await_terminal(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrintJobFailed);
        assert_eq!(monitor.service().query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_forever_times_out_and_cancels() {
        let dir = tempdir().unwrap();
        let policy = PollPolicy {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(400),
            timeout: Duration::from_secs(3),
        };
        let monitor = monitor(ScriptedPrintService::new([]), dir.path(), policy);
        let handle = monitor
            .submit(&view(), "slow", &PageAttributes::default())
            .unwrap();
        let err = monitor
            .await_terminal(&handle, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrintJobTimeout);
        assert_eq!(monitor.service().cancelled(), vec![handle]);
        // 100 + 200 + 400 * n intervals fit in three seconds
        assert!(monitor.service().query_count() < 12);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_cancels_job() {
        let dir = tempdir().unwrap();
        let monitor = monitor(ScriptedPrintService::new([]), dir.path(), PollPolicy::default());
        let handle = monitor
            .submit(&view(), "slow", &PageAttributes::default())
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let err = monitor.await_terminal(&handle, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(monitor.service().cancelled().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_artifact_is_found_by_retry() {
        let dir = tempdir().unwrap();
        let monitor = monitor(ScriptedPrintService::new([]), dir.path(), PollPolicy::default());
        let path = dir.path().join("late.pdf");
        let writer = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            std::fs::write(writer, b"%PDF").unwrap();
        });
        assert_eq!(monitor.locate_artifact("late").await.unwrap(), path);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_artifact_is_missing() {
        let dir = tempdir().unwrap();
        let monitor = monitor(ScriptedPrintService::new([]), dir.path(), PollPolicy::default());
        let err = monitor.locate_artifact("never").await.unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }
}

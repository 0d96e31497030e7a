use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

/// Default retention for scratch artifacts.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp that never repeats or goes backwards within the process.
fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_STAMP.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Scratch directory holding generated artifacts.
/// 暫存產生文件的目錄。
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    extension: String,
    default_base: String,
}

impl ArtifactStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        default_base: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            default_base: default_base.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `base_<epoch-millis>.<ext>`; blank bases fall back to the default.
    pub fn generate_name(&self, base: Option<&str>) -> String {
        format!("{}.{}", self.generate_stem(base), self.extension)
    }

    /// `base_<epoch-millis>` without extension, used as a print job name.
    pub fn generate_stem(&self, base: Option<&str>) -> String {
        let base = sanitize_base(base.unwrap_or_default())
            .unwrap_or_else(|| self.default_base.clone());
        format!("{base}_{}", next_stamp())
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Reserves a fresh path inside the scratch directory.
    pub fn allocate(&self, base: Option<&str>) -> io::Result<PathBuf> {
        self.ensure_dir()?;
        Ok(self.dir.join(self.generate_name(base)))
    }

    pub fn sweep(&self, max_age: Duration) -> SweepReport {
        self.sweep_at(max_age, SystemTime::now())
    }

    /// Deletes artifacts whose age at `now` is strictly greater than `max_age`.
    pub fn sweep_at(&self, max_age: Duration, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return report,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "cannot list scratch directory");
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !self.owns(&path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot stat artifact");
                    report.failed += 1;
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            match age {
                Some(age) if age > max_age => match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), age_secs = age.as_secs(), "expired artifact removed");
                        report.deleted += 1;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to remove expired artifact");
                        report.failed += 1;
                    }
                },
                _ => report.retained += 1,
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            info!(
                dir = %self.dir.display(),
                deleted = report.deleted,
                retained = report.retained,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        report
    }

    fn owns(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

/// Replaces path separators and control characters; `None` when blank.
pub fn sanitize_base(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '-',
            ch if ch.is_control() => '-',
            ch => ch,
        })
        .collect();
    if cleaned.chars().all(|ch| ch == '.' || ch == '-') {
        return None;
    }
    Some(cleaned)
}

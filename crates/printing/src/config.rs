use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bracket::{BracketOptions, ShadeHeuristic, DEFAULT_MARKER_CLASS};
use crate::distribute::PDF_MIME_TYPE;
use crate::geometry::{Orientation, PageSpec, PaperFormat, Placement};
use crate::job::{Margin, PageAttributes, PrintColorMode};
use crate::monitor::{ArtifactLookup, MonitorOptions, PollPolicy};
use crate::store::DEFAULT_MAX_AGE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Pipeline configuration.
/// 管線設定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Optional second destination for every composed document.
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_base_name")]
    pub default_base_name: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub bracket: BracketConfig,
    #[serde(default)]
    pub print: PrintConfig,
    #[serde(default)]
    pub share: ShareConfig,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("rendershare")
}

fn default_retention_secs() -> u64 {
    DEFAULT_MAX_AGE.as_secs()
}

fn default_base_name() -> String {
    "document".to_string()
}

fn default_extension() -> String {
    "pdf".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            mirror_dir: None,
            retention_secs: default_retention_secs(),
            default_base_name: default_base_name(),
            extension: default_extension(),
            page: PageConfig::default(),
            bracket: BracketConfig::default(),
            print: PrintConfig::default(),
            share: ShareConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Self::default();
            config.sanitize();
            return Ok(config);
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        if self.scratch_dir.as_os_str().is_empty() {
            self.scratch_dir = default_scratch_dir();
        }
        if self
            .mirror_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            self.mirror_dir = None;
        }
        if self.retention_secs == 0 {
            self.retention_secs = default_retention_secs();
        }
        if self.default_base_name.trim().is_empty() {
            self.default_base_name = default_base_name();
        }
        let extension = self.extension.trim().trim_start_matches('.');
        self.extension = if extension.is_empty() || extension.contains(['/', '\\']) {
            default_extension()
        } else {
            extension.to_ascii_lowercase()
        };
        self.bracket.sanitize();
        self.print.sanitize();
        self.share.sanitize();
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn page_spec(&self) -> PageSpec {
        PageSpec::from_format(self.page.format, self.page.orientation)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.print
            .spool_dir
            .clone()
            .unwrap_or_else(|| self.scratch_dir.join("spool"))
    }

    pub fn bracket_options(&self) -> BracketOptions {
        BracketOptions {
            marker_class: self.bracket.marker_class.clone(),
            force_contrast: self.bracket.force_contrast,
            heuristic: self.bracket.heuristic,
            ack_wait: self.bracket.ack_wait_ms.map(Duration::from_millis),
        }
    }

    pub fn page_attributes(&self) -> PageAttributes {
        PageAttributes {
            media: self.page.format,
            orientation: self.page.orientation,
            resolution_dpi: self.print.resolution_dpi,
            margins: Margin::uniform(self.print.margin_pt),
            color_mode: self.print.color_mode,
        }
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            poll: PollPolicy {
                initial_interval: Duration::from_millis(self.print.poll_initial_ms),
                max_interval: Duration::from_millis(self.print.poll_max_ms),
                timeout: Duration::from_millis(self.print.poll_timeout_ms),
            },
            lookup: ArtifactLookup {
                attempts: self.print.lookup_attempts,
                delay: Duration::from_millis(self.print.lookup_delay_ms),
            },
            artifact_dir: self.spool_dir(),
            extension: self.extension.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub format: PaperFormat,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketConfig {
    #[serde(default = "default_marker_class")]
    pub marker_class: String,
    #[serde(default = "default_true")]
    pub force_contrast: bool,
    /// Bounded wait for script acks; unset means observe in the background.
    #[serde(default)]
    pub ack_wait_ms: Option<u64>,
    #[serde(default)]
    pub heuristic: ShadeHeuristic,
}

fn default_marker_class() -> String {
    DEFAULT_MARKER_CLASS.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            marker_class: default_marker_class(),
            force_contrast: true,
            ack_wait_ms: None,
            heuristic: ShadeHeuristic::default(),
        }
    }
}

impl BracketConfig {
    fn sanitize(&mut self) {
        let valid = !self.marker_class.is_empty()
            && self
                .marker_class
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            self.marker_class = default_marker_class();
        }
        if let Some(wait) = self.ack_wait_ms {
            self.ack_wait_ms = Some(wait.clamp(1, 60_000));
        }
        let defaults = ShadeHeuristic::default();
        if !self.heuristic.light_luminance.is_finite() {
            self.heuristic.light_luminance = defaults.light_luminance;
        }
        if !self.heuristic.dark_luminance.is_finite() {
            self.heuristic.dark_luminance = defaults.dark_luminance;
        }
        self.heuristic.light_luminance = self.heuristic.light_luminance.clamp(0.0, 1.0);
        self.heuristic.dark_luminance = self.heuristic.dark_luminance.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintConfig {
    /// Where the print service leaves finished jobs; defaults to `<scratch>/spool`.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    #[serde(default = "default_resolution_dpi")]
    pub resolution_dpi: u32,
    #[serde(default = "default_margin_pt")]
    pub margin_pt: f32,
    #[serde(default)]
    pub color_mode: PrintColorMode,
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,
    #[serde(default = "default_lookup_delay_ms")]
    pub lookup_delay_ms: u64,
}

fn default_resolution_dpi() -> u32 {
    300
}

fn default_margin_pt() -> f32 {
    20.0
}

fn default_poll_initial_ms() -> u64 {
    100
}

fn default_poll_max_ms() -> u64 {
    2_000
}

fn default_poll_timeout_ms() -> u64 {
    120_000
}

fn default_lookup_attempts() -> u32 {
    5
}

fn default_lookup_delay_ms() -> u64 {
    200
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            spool_dir: None,
            resolution_dpi: default_resolution_dpi(),
            margin_pt: default_margin_pt(),
            color_mode: PrintColorMode::Color,
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            lookup_attempts: default_lookup_attempts(),
            lookup_delay_ms: default_lookup_delay_ms(),
        }
    }
}

impl PrintConfig {
    fn sanitize(&mut self) {
        self.resolution_dpi = self.resolution_dpi.clamp(72, 2_400);
        if !self.margin_pt.is_finite() {
            self.margin_pt = default_margin_pt();
        }
        self.margin_pt = self.margin_pt.clamp(0.0, 144.0);
        self.poll_initial_ms = self.poll_initial_ms.max(10);
        self.poll_max_ms = self.poll_max_ms.max(self.poll_initial_ms);
        self.poll_timeout_ms = self.poll_timeout_ms.max(self.poll_initial_ms);
        self.lookup_attempts = self.lookup_attempts.clamp(1, 50);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_share_title")]
    pub title: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_share_title() -> String {
    "Share PDF".to_string()
}

fn default_mime_type() -> String {
    PDF_MIME_TYPE.to_string()
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            title: default_share_title(),
            mime_type: default_mime_type(),
        }
    }
}

impl ShareConfig {
    fn sanitize(&mut self) {
        if self.title.trim().is_empty() {
            self.title = default_share_title();
        }
        if self.mime_type.trim().is_empty() {
            self.mime_type = default_mime_type();
        }
    }
}

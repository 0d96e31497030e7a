use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::geometry::{Orientation, PageSpec, PaperFormat};

/// Opaque identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrintJobId(u64);

impl PrintJobId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl Default for PrintJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrintJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-job-{}", self.0)
    }
}

/// Handle returned by a print service for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: PrintJobId,
    pub name: String,
}

impl JobHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PrintJobId::new(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// State reported by the print service for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintJobState {
    Pending,
    Completed,
    Failed(String),
    Cancelled,
}

impl PrintJobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrintJobState::Pending)
    }
}

/// Colour mode for the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintColorMode {
    #[default]
    Color,
    Grayscale,
}

/// Margin values expressed in points (1/72").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margin {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Margin {
    pub const fn zero() -> Self {
        Self::uniform(0.0)
    }

    pub const fn uniform(value: f32) -> Self {
        Self {
            top: value,
            bottom: value,
            left: value,
            right: value,
        }
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::zero()
    }
}

/// Attributes handed to the print service alongside the document adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageAttributes {
    pub media: PaperFormat,
    pub orientation: Orientation,
    pub resolution_dpi: u32,
    pub margins: Margin,
    pub color_mode: PrintColorMode,
}

impl PageAttributes {
    pub fn page_spec(&self) -> PageSpec {
        PageSpec::from_format(self.media, self.orientation)
    }
}

impl Default for PageAttributes {
    fn default() -> Self {
        Self {
            media: PaperFormat::A4,
            orientation: Orientation::Portrait,
            resolution_dpi: 300,
            margins: Margin::uniform(20.0),
            color_mode: PrintColorMode::Color,
        }
    }
}

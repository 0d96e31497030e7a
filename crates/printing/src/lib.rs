//! Render a live document view into a PDF artifact, then share or print it.
//! 將即時文件檢視輸出為 PDF，並進行分享或列印。

pub mod bracket;
pub mod composer;
pub mod config;
pub mod display;
pub mod distribute;
pub mod error;
pub mod geometry;
pub mod job;
pub mod monitor;
pub mod pdf;
pub mod pipeline;
pub mod platform;
pub mod scene;
pub mod spool;
pub mod store;
pub mod view;

pub use bracket::{
    BracketGuard, BracketOptions, ShadeHeuristic, StyleBracket, StyleOp, StyleProperty,
    StyleScript, ScriptPhase, DEFAULT_MARKER_CLASS,
};
pub use composer::{
    ComposeError, ComposeTargets, DocumentArtifact, DocumentComposer, RenderedDocument,
};
pub use config::{ConfigError, PipelineConfig};
pub use display::{Color, DisplayCommand, DisplayList, PageSurface, Point, RasterImage, Size};
pub use distribute::{DirectoryDistributor, DistributionError, Distributor, ShareRequest};
pub use error::{CallReply, ErrorKind, PipelineError};
pub use geometry::{
    compute, compute_in, GeometryError, Orientation, PageGeometry, PageSpec, PaperFormat,
    Placement, PrintableArea,
};
pub use job::{JobHandle, Margin, PageAttributes, PrintColorMode, PrintJobId, PrintJobState};
pub use monitor::{ArtifactLookup, MonitorOptions, PollPolicy, PrintJobMonitor};
pub use pdf::{PdfDocument, PdfOptions};
pub use pipeline::{Pipeline, RenderMode, RenderRequest, RenderResponse, RenderTarget};
pub use platform::PrintService;
pub use scene::{AckBehavior, SceneError, SceneView};
pub use spool::{SpoolError, SpoolPrintService, DEFAULT_JOB_RETENTION};
pub use store::{ArtifactStore, SweepReport};
pub use view::{
    AckStatus, AdapterError, DocumentInfo, PrintDocumentAdapter, ScriptAck, ScriptError,
    ScriptResponder, ViewSurface,
};

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::bracket::StyleScript;
use crate::display::PageSurface;
use crate::job::PageAttributes;

/// Failure reported by a view while evaluating a style script.
/// 檢視執行樣式腳本時回報的錯誤。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("script evaluation failed: {0}")]
pub struct ScriptError(pub String);

/// Failure raised by a print document adapter.
/// 列印文件轉接器產生的錯誤。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("layout failed: {0}")]
    Layout(String),
    #[error("failed to write page {page}: {reason}")]
    Write { page: u32, reason: String },
    #[error("adapter cancelled")]
    Cancelled,
}

/// Live, paintable document view owned by the host.
/// 由宿主擁有、可繪製的文件檢視。
pub trait ViewSurface: Send + Sync {
    /// Laid-out width in pixels. Zero or negative when not laid out yet.
    fn width(&self) -> i32;
    /// Laid-out height in pixels. Zero or negative when not laid out yet.
    fn height(&self) -> i32;
    /// Paints the current visual state synchronously into `surface`.
    fn paint_into(&self, surface: &mut PageSurface);
    /// Starts evaluating a style script. Completion is reported through the ack.
    fn evaluate_script(&self, script: &StyleScript) -> ScriptAck;
    /// Produces an adapter that lays out and writes the view for printing.
    fn create_print_adapter(&self, job_name: &str) -> Box<dyn PrintDocumentAdapter>;
}

/// Document metadata returned by [`PrintDocumentAdapter::on_layout`].
/// 版面配置完成後回傳的文件資訊。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub page_count: u32,
}

/// Pull-based document producer used by print services.
/// 列印服務使用的文件產生器。
pub trait PrintDocumentAdapter: Send {
    fn on_layout(&mut self, attributes: &PageAttributes) -> Result<DocumentInfo, AdapterError>;
    fn on_write_page(&mut self, index: u32, surface: &mut PageSurface) -> Result<(), AdapterError>;
    fn on_finish(&mut self) {}
}

/// Outcome observed on a [`ScriptAck`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Acknowledged(String),
    Failed(ScriptError),
    TimedOut,
    /// The view dropped its responder without answering.
    Dropped,
}

/// One-shot completion notice for a script evaluation.
#[derive(Debug)]
pub struct ScriptAck {
    receiver: oneshot::Receiver<Result<String, ScriptError>>,
}

/// Sending half kept by the view until the script finishes.
#[derive(Debug)]
pub struct ScriptResponder {
    sender: oneshot::Sender<Result<String, ScriptError>>,
}

impl ScriptResponder {
    pub fn respond(self, result: Result<String, ScriptError>) {
        // Receiver may already be gone; nobody is waiting then.
        let _ = self.sender.send(result);
    }
}

impl ScriptAck {
    /// Ack that is already resolved.
    pub fn ready(result: Result<String, ScriptError>) -> Self {
        let (responder, ack) = Self::pending();
        responder.respond(result);
        ack
    }

    pub fn pending() -> (ScriptResponder, ScriptAck) {
        let (sender, receiver) = oneshot::channel();
        (ScriptResponder { sender }, ScriptAck { receiver })
    }

    /// Waits at most `limit` for the view to answer.
    pub async fn wait(self, limit: Duration) -> AckStatus {
        match tokio::time::timeout(limit, self.receiver).await {
            Ok(Ok(Ok(value))) => AckStatus::Acknowledged(value),
            Ok(Ok(Err(err))) => AckStatus::Failed(err),
            Ok(Err(_)) => AckStatus::Dropped,
            Err(_) => AckStatus::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_ack_resolves_immediately() {
        let status = ScriptAck::ready(Ok("done".into()))
            .wait(Duration::from_millis(10))
            .await;
        assert_eq!(status, AckStatus::Acknowledged("done".into()));
    }

    #[tokio::test]
    async fn dropped_responder_is_reported() {
        let (responder, ack) = ScriptAck::pending();
        drop(responder);
        assert_eq!(ack.wait(Duration::from_secs(1)).await, AckStatus::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_view_times_out() {
        let (_responder, ack) = ScriptAck::pending();
        assert_eq!(ack.wait(Duration::from_millis(250)).await, AckStatus::TimedOut);
    }
}

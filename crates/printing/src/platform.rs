use crate::job::{JobHandle, PageAttributes, PrintJobState};
use crate::view::PrintDocumentAdapter;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

/// Abstraction over the host's print service.
/// 宿主列印服務的抽象介面。
pub trait PrintService: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Starts a job that pulls its pages from `adapter`.
    /// 建立列印作業，頁面由轉接器提供。
    fn submit(
        &self,
        job_name: &str,
        adapter: Box<dyn PrintDocumentAdapter>,
        attributes: &PageAttributes,
    ) -> Result<JobHandle, Self::Error>;

    /// Reports the current state of a submitted job.
    /// 回報作業目前的狀態。
    fn query_state(&self, handle: &JobHandle) -> Result<PrintJobState, Self::Error>;

    /// Requests cancellation. Services without cancellation ignore it.
    /// 要求取消作業；不支援時忽略。
    fn cancel(&self, handle: &JobHandle) -> Result<(), Self::Error> {
        let _ = handle;
        Ok(())
    }
}

/// Error produced by the scripted service.
/// 模擬服務產生的錯誤。
#[cfg(test)]
#[derive(Debug, thiserror::Error)]
#[error("scripted service error: {0}")]
pub struct ScriptedServiceError(pub String);

/// In-memory [`PrintService`] replaying a fixed sequence of states.
/// 依預先排定狀態序列回應的記憶體內列印服務。
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedPrintService {
    script: Mutex<VecDeque<Result<PrintJobState, String>>>,
    last: Mutex<Option<PrintJobState>>,
    submitted: Mutex<Vec<(String, PageAttributes)>>,
    cancelled: Mutex<Vec<JobHandle>>,
    queries: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedPrintService {
    pub fn new(script: impl IntoIterator<Item = Result<PrintJobState, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<(String, PageAttributes)> {
        self.submitted.lock().expect("lock poisoned").clone()
    }

    pub fn cancelled(&self) -> Vec<JobHandle> {
        self.cancelled.lock().expect("lock poisoned").clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl PrintService for ScriptedPrintService {
    type Error = ScriptedServiceError;

    fn submit(
        &self,
        job_name: &str,
        mut adapter: Box<dyn PrintDocumentAdapter>,
        attributes: &PageAttributes,
    ) -> Result<JobHandle, Self::Error> {
        adapter
            .on_layout(attributes)
            .map_err(|err| ScriptedServiceError(err.to_string()))?;
        self.submitted
            .lock()
            .expect("lock poisoned")
            .push((job_name.to_string(), attributes.clone()));
        Ok(JobHandle::new(job_name))
    }

    fn query_state(&self, _: &JobHandle) -> Result<PrintJobState, Self::Error> {
        self.queries
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.script.lock().expect("lock poisoned").pop_front();
        let mut last = self.last.lock().expect("lock poisoned");
        match next {
            Some(Ok(state)) => {
                *last = Some(state.clone());
                Ok(state)
            }
            Some(Err(reason)) => Err(ScriptedServiceError(reason)),
            None => Ok(last.clone().unwrap_or(PrintJobState::Pending)),
        }
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), Self::Error> {
        self.cancelled
            .lock()
            .expect("lock poisoned")
            .push(handle.clone());
        *self.last.lock().expect("lock poisoned") = Some(PrintJobState::Cancelled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneView;
    use crate::view::ViewSurface;

    fn adapter() -> Box<dyn PrintDocumentAdapter> {
        SceneView::from_json(r#"{ "width": 10, "height": 10 }"#, None)
            .unwrap()
            .create_print_adapter("job")
    }

    #[test]
    fn scripted_service_replays_then_repeats_last_state() {
        let service = ScriptedPrintService::new([
            Ok(PrintJobState::Pending),
            Ok(PrintJobState::Completed),
        ]);
        let handle = service
            .submit("job", adapter(), &PageAttributes::default())
            .unwrap();
        assert_eq!(service.query_state(&handle).unwrap(), PrintJobState::Pending);
        assert_eq!(service.query_state(&handle).unwrap(), PrintJobState::Completed);
        assert_eq!(service.query_state(&handle).unwrap(), PrintJobState::Completed);
        assert_eq!(service.query_count(), 3);
        assert_eq!(service.submitted()[0].0, "job");
    }

    #[test]
    fn cancel_is_recorded_and_sticks() {
        let service = ScriptedPrintService::new([]);
        let handle = service
            .submit("job", adapter(), &PageAttributes::default())
            .unwrap();
        service.cancel(&handle).unwrap();
        assert_eq!(service.cancelled(), vec![handle.clone()]);
        assert_eq!(service.query_state(&handle).unwrap(), PrintJobState::Cancelled);
    }
}

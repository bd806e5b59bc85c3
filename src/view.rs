//! The upload → analyze → render state machine.

use std::{fmt, mem, sync::Arc, time::Duration};

use crate::engine::{AnalysisEngine, AnalysisOutcome, EngineResult};
use crate::error::SubmitError;
use crate::model::{AnalysisRequest, AnalysisResult, AnalysisService};
use crate::preview::{Preview, PreviewStore};
use crate::render::{Panel, RenderOptions, render};

/// The image the user picked, with its preview.
#[derive(Debug)]
pub struct SelectedImage {
    file_name: String,
    bytes: Arc<[u8]>,
    preview: Preview,
}

impl SelectedImage {
    pub(crate) fn new(file_name: String, bytes: Arc<[u8]>, previews: &PreviewStore) -> Self {
        Self {
            file_name,
            preview: previews.create(bytes.clone()),
            bytes,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }
}

/// Human-readable failure shown in place of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub message: String,
}

impl ErrorState {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Every state the view can be in. A result and an error can never coexist,
/// and a pending request never carries either.
#[derive(Debug, Default)]
pub enum ViewState {
    /// No file chosen.
    #[default]
    Idle,
    /// File chosen, nothing in flight.
    Ready { image: SelectedImage },
    /// Request `request_id` is in flight.
    Pending {
        image: SelectedImage,
        request_id: u64,
    },
    Succeeded {
        image: SelectedImage,
        result: AnalysisResult,
    },
    /// The last attempt failed. `image` is `None` when the failure was a
    /// submit without a selection.
    Failed {
        image: Option<SelectedImage>,
        error: ErrorState,
    },
}

impl ViewState {
    pub fn name(&self) -> &'static str {
        match self {
            ViewState::Idle => "idle",
            ViewState::Ready { .. } => "ready",
            ViewState::Pending { .. } => "pending",
            ViewState::Succeeded { .. } => "succeeded",
            ViewState::Failed { .. } => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ViewState::Pending { .. })
    }

    pub fn selected_image(&self) -> Option<&SelectedImage> {
        match self {
            ViewState::Idle => None,
            ViewState::Ready { image }
            | ViewState::Pending { image, .. }
            | ViewState::Succeeded { image, .. } => Some(image),
            ViewState::Failed { image, .. } => image.as_ref(),
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            ViewState::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorState> {
        match self {
            ViewState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    fn take_image(self) -> Option<SelectedImage> {
        match self {
            ViewState::Idle => None,
            ViewState::Ready { image }
            | ViewState::Pending { image, .. }
            | ViewState::Succeeded { image, .. } => Some(image),
            ViewState::Failed { image, .. } => image,
        }
    }
}

/// What a submit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A request was handed to the engine.
    Dispatched(u64),
    /// A request is already in flight; nothing was sent.
    AlreadyPending,
    /// The engine refused the request; the view is now `Failed`.
    EngineStopped,
}

/// One analysis view: owns the selection, the engine and the current state.
pub struct AnalysisView<S: AnalysisService + Send + 'static> {
    state: ViewState,
    engine: AnalysisEngine<S>,
    previews: PreviewStore,
}

impl<S: AnalysisService + Send + 'static> AnalysisView<S> {
    pub fn new(service: S) -> Self {
        Self::with_previews(service, PreviewStore::new())
    }

    pub fn with_previews(service: S, previews: PreviewStore) -> Self {
        Self {
            state: ViewState::Idle,
            engine: AnalysisEngine::new(service),
            previews,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    /// Whether the analyze trigger should be enabled.
    pub fn can_submit(&self) -> bool {
        !self.state.is_pending() && self.state.selected_image().is_some()
    }

    /// Replaces the selection and moves to `Ready`, clearing any result or
    /// error. The previous preview is released.
    ///
    /// Ignored while a request is in flight; returns whether it applied.
    pub fn select_image(
        &mut self,
        file_name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> bool {
        if self.state.is_pending() {
            log::warn!("Ignoring image selection while an analysis is in flight");
            return false;
        }

        let image = SelectedImage::new(file_name.into(), bytes.into(), &self.previews);
        log::debug!(
            "Selected {} ({} bytes) as {}",
            image.file_name,
            image.bytes.len(),
            image.preview.reference()
        );

        // Old selection (and its preview) drops here.
        self.state = ViewState::Ready { image };
        true
    }

    /// Sends the selected image for analysis.
    pub fn submit(&mut self) -> Result<SubmitOutcome, SubmitError> {
        if self.state.is_pending() {
            log::debug!("Analysis already in flight, ignoring submit");
            return Ok(SubmitOutcome::AlreadyPending);
        }

        let Some(image) = mem::take(&mut self.state).take_image() else {
            let err = SubmitError::NoImageSelected;
            self.state = ViewState::Failed {
                image: None,
                error: ErrorState::new(err.to_string()),
            };
            return Err(err);
        };

        let request = AnalysisRequest::new(image.file_name.clone(), image.bytes.clone());
        match self.engine.schedule(request) {
            Some(request_id) => {
                log::info!("Submitted {} for analysis", image.file_name);
                self.state = ViewState::Pending { image, request_id };
                Ok(SubmitOutcome::Dispatched(request_id))
            }
            None => {
                self.state = ViewState::Failed {
                    image: Some(image),
                    error: ErrorState::new("analysis engine is not running"),
                };
                Ok(SubmitOutcome::EngineStopped)
            }
        }
    }

    /// Applies a finished outcome, if any, without blocking.
    ///
    /// Returns `true` when the view left `Pending`.
    pub fn poll(&mut self) -> bool {
        while self.state.is_pending() {
            match self.engine.try_poll_response() {
                EngineResult::Empty(_) => return false,
                result => {
                    if self.apply(result) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Blocks until the in-flight request settles or `timeout` elapses.
    ///
    /// Returns `true` when the view left `Pending`.
    pub fn wait(&mut self, timeout: Option<Duration>) -> bool {
        while self.state.is_pending() {
            match self.engine.wait_response(timeout) {
                EngineResult::Empty(_) => return false,
                result => {
                    if self.apply(result) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Projects the current state for display.
    pub fn render(&self, options: RenderOptions) -> Panel {
        render(&self.state, options)
    }

    fn apply(&mut self, result: EngineResult) -> bool {
        let ViewState::Pending { request_id, .. } = &self.state else {
            return false;
        };
        let request_id = *request_id;

        let outcome = match result {
            EngineResult::Empty(_) => return false,
            EngineResult::Completed(outcome) if outcome.id != request_id => {
                log::warn!(
                    "Dropping stale outcome {} while waiting for {}",
                    outcome.id,
                    request_id
                );
                return false;
            }
            EngineResult::Completed(AnalysisOutcome { result, duration, .. }) => {
                log::debug!("Analysis {} settled after {:?}", request_id, duration);
                result.map_err(|err| ErrorState::new(err.to_string()))
            }
            EngineResult::Error(message) => Err(ErrorState::new(message)),
        };

        let Some(image) = mem::take(&mut self.state).take_image() else {
            return false;
        };
        self.state = match outcome {
            Ok(result) => ViewState::Succeeded { image, result },
            Err(error) => {
                log::warn!("Analysis of {} failed: {}", image.file_name, error);
                ViewState::Failed {
                    image: Some(image),
                    error,
                }
            }
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::messages::{AnalyzeResponse, CellCounts, Summary};
    use std::collections::VecDeque;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    /// Replies from a script, optionally holding each reply until released.
    struct ScriptedService {
        calls: Arc<AtomicUsize>,
        replies: VecDeque<Result<AnalysisResult, ServiceError>>,
        gate: Option<mpsc::Receiver<()>>,
        seen: Arc<Mutex<Vec<AnalysisRequest>>>,
    }

    impl AnalysisService for ScriptedService {
        fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            self.replies
                .pop_front()
                .unwrap_or_else(|| Ok(AnalysisResult::default()))
        }
    }

    struct Harness {
        view: AnalysisView<ScriptedService>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<AnalysisRequest>>>,
        release: Option<mpsc::Sender<()>>,
    }

    fn harness(replies: Vec<Result<AnalysisResult, ServiceError>>, gated: bool) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = if gated {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let service = ScriptedService {
            calls: calls.clone(),
            replies: replies.into(),
            gate,
            seen: seen.clone(),
        };
        Harness {
            view: AnalysisView::new(service),
            calls,
            seen,
            release,
        }
    }

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            summary: Summary {
                total_cells: 12,
                cell_counts: CellCounts {
                    rbc: 9,
                    wbc: 2,
                    platelets: 1,
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn selecting_moves_to_ready_with_preview() {
        let mut h = harness(vec![], false);
        assert!(matches!(h.view.state(), ViewState::Idle));
        assert!(!h.view.can_submit());

        assert!(h.view.select_image("a.png", vec![1u8, 2, 3]));

        let image = h.view.state().selected_image().unwrap();
        assert_eq!(h.view.state().name(), "ready");
        assert_eq!(image.file_name(), "a.png");
        let reference = image.preview().reference();
        assert!(h.view.previews().resolve(&reference).is_some());
        assert!(h.view.can_submit());
    }

    #[test]
    fn reselecting_releases_previous_preview_and_clears_outcome() {
        let mut h = harness(vec![Ok(sample_result())], false);
        h.view.select_image("a.png", vec![1u8]);
        let first = h.view.state().selected_image().unwrap().preview().reference();

        h.view.submit().unwrap();
        assert!(h.view.wait(None));
        assert!(h.view.state().result().is_some());

        h.view.select_image("b.png", vec![2u8]);
        assert_eq!(h.view.state().name(), "ready");
        assert!(h.view.state().result().is_none());
        assert!(h.view.state().error().is_none());
        assert!(h.view.previews().resolve(&first).is_none());
        assert_eq!(h.view.previews().live_count(), 1);
    }

    #[test]
    fn selecting_after_failure_returns_to_ready() {
        let mut h = harness(vec![Err(ServiceError::reported(None))], false);
        h.view.select_image("a.png", vec![1u8]);
        h.view.submit().unwrap();
        h.view.wait(None);
        assert_eq!(h.view.state().name(), "failed");

        h.view.select_image("b.png", vec![2u8]);
        assert_eq!(h.view.state().name(), "ready");
        assert!(h.view.state().error().is_none());
    }

    #[test]
    fn submit_without_image_never_reaches_service() {
        let mut h = harness(vec![], false);
        assert_eq!(h.view.submit(), Err(SubmitError::NoImageSelected));
        assert_eq!(h.view.state().name(), "failed");
        assert_eq!(h.view.state().error().unwrap().message, "no image selected");
        assert!(!h.view.poll());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn submit_while_pending_is_a_no_op() {
        let mut h = harness(vec![Ok(sample_result())], true);
        h.view.select_image("a.png", vec![1u8]);

        assert!(matches!(h.view.submit(), Ok(SubmitOutcome::Dispatched(_))));
        assert!(h.view.state().is_pending());
        assert!(!h.view.can_submit());
        assert_eq!(h.view.submit(), Ok(SubmitOutcome::AlreadyPending));
        assert!(!h.view.select_image("b.png", vec![2u8]));
        assert!(!h.view.poll());

        h.release.take().unwrap().send(()).unwrap();
        assert!(h.view.wait(None));
        assert_eq!(h.view.state().name(), "succeeded");
        assert_eq!(h.view.state().selected_image().unwrap().file_name(), "a.png");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_carries_selection_and_thresholds() {
        let mut h = harness(vec![], false);
        h.view.select_image("smear.jpg", vec![9u8, 9]);
        h.view.submit().unwrap();
        h.view.wait(None);

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].file_name, "smear.jpg");
        assert_eq!(&*seen[0].image, &[9u8, 9][..]);
        assert_eq!(seen[0].conf_threshold, 0.25);
        assert_eq!(seen[0].iou_threshold, 0.45);
    }

    #[test]
    fn reported_failure_keeps_message() {
        let reply = AnalyzeResponse::parse(br#"{"success": false, "error": "low image quality"}"#)
            .unwrap()
            .into_result();
        let mut h = harness(vec![reply], false);
        h.view.select_image("a.png", vec![1u8]);
        h.view.submit().unwrap();
        assert!(h.view.wait(None));
        assert_eq!(h.view.state().error().unwrap().message, "low image quality");
    }

    #[test]
    fn malformed_response_fails_with_synthesized_message() {
        let reply = AnalyzeResponse::parse(b"<html>502 Bad Gateway</html>").and_then(|r| r.into_result());
        let mut h = harness(vec![reply], false);
        h.view.select_image("a.png", vec![1u8]);
        h.view.submit().unwrap();
        assert!(h.view.wait(None));
        assert_eq!(h.view.state().name(), "failed");
        assert!(
            h.view
                .state()
                .error()
                .unwrap()
                .message
                .starts_with("malformed response from analysis service")
        );
    }

    #[test]
    fn failed_attempt_can_be_retried() {
        let mut h = harness(
            vec![Err(ServiceError::reported(None)), Ok(sample_result())],
            false,
        );
        h.view.select_image("a.png", vec![1u8]);
        h.view.submit().unwrap();
        h.view.wait(None);
        assert_eq!(h.view.state().error().unwrap().message, "Analysis failed");

        assert!(h.view.can_submit());
        h.view.submit().unwrap();
        h.view.wait(None);
        assert_eq!(h.view.state().result().unwrap().summary.total_cells, 12);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_outcome_leaves_view_pending() {
        let mut h = harness(vec![Ok(sample_result())], true);
        h.view.select_image("a.png", vec![1u8]);
        let Ok(SubmitOutcome::Dispatched(request_id)) = h.view.submit() else {
            panic!("expected a dispatched request");
        };

        let stale = AnalysisOutcome {
            id: request_id + 100,
            start_time: std::time::Instant::now(),
            duration: Duration::ZERO,
            request_metadata: crate::model::RequestMetadata {
                file_name: "old.png".to_string(),
                image_len: 1,
            },
            result: Err(ServiceError::reported(Some("stale".to_string()))),
        };
        assert!(!h.view.apply(EngineResult::Completed(stale)));
        assert_eq!(h.view.state().name(), "pending");
        assert!(h.view.state().error().is_none());

        h.release.take().unwrap().send(()).unwrap();
        assert!(h.view.wait(None));
        assert_eq!(h.view.state().name(), "succeeded");
    }

    #[test]
    fn wait_with_timeout_leaves_request_pending() {
        let mut h = harness(vec![], true);
        h.view.select_image("a.png", vec![1u8]);
        h.view.submit().unwrap();
        assert!(!h.view.wait(Some(Duration::from_millis(20))));
        assert!(h.view.state().is_pending());

        h.release.take().unwrap().send(()).unwrap();
        assert!(h.view.wait(None));
    }

    #[test]
    fn dropping_view_releases_preview() {
        let previews = PreviewStore::new();
        let h = harness(vec![], false);
        let mut view = AnalysisView::with_previews(
            ScriptedService {
                calls: h.calls.clone(),
                replies: VecDeque::new(),
                gate: None,
                seen: h.seen.clone(),
            },
            previews.clone(),
        );
        view.select_image("a.png", vec![1u8]);
        assert_eq!(previews.live_count(), 1);
        drop(view);
        assert_eq!(previews.live_count(), 0);
    }
}

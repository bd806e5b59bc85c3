use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::error::ServiceError;
use crate::model::{AnalysisRequest, AnalysisResult, AnalysisService, RequestMetadata};

/// Represents the current state of the analysis engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No request is being processed.
    Idle,
    /// A request is being sent to the service.
    Processing,
}

impl EngineState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Processing => "processing",
        }
    }
}

/// Internal request wrapper used by the engine to track requests.
struct EngineRequest {
    id: u64,
    request: AnalysisRequest,
}

/// A finished request, successful or not, with timing data.
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// Identifier returned by [`AnalysisEngine::schedule`].
    pub id: u64,
    /// Timestamp when the request was handed to the service.
    pub start_time: Instant,
    /// Total time the service call took.
    pub duration: Duration,
    pub request_metadata: RequestMetadata,
    pub result: Result<AnalysisResult, ServiceError>,
}

/// Result type returned when polling the engine.
#[derive(Debug)]
pub enum EngineResult {
    /// A request finished.
    Completed(AnalysisOutcome),
    /// No outcome available yet, with the current engine state.
    Empty(EngineState),
    /// The worker is gone and no outcome will ever arrive.
    Error(String),
}

/// Runs analysis requests on a dedicated worker thread.
///
/// The caller never blocks on the network: it schedules a request and later
/// polls (or waits) for the outcome. Service failures are captured in the
/// outcome rather than stopping the worker.
pub struct AnalysisEngine<S: AnalysisService + Send + 'static> {
    state: Arc<Mutex<EngineState>>,
    req_tx: Option<mpsc::Sender<EngineRequest>>,
    rep_rx: Mutex<mpsc::Receiver<AnalysisOutcome>>,
    worker: Option<JoinHandle<Option<S>>>,
    /// Set by [`AnalysisEngine::stop`]; otherwise the service drops on the worker.
    hand_back: Arc<AtomicBool>,
    id_counter: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: AnalysisService + Send + 'static> AnalysisEngine<S> {
    /// Creates an engine and moves `service` onto its worker thread.
    pub fn new(mut service: S) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<EngineRequest>();
        let (rep_tx, rep_rx) = mpsc::channel::<AnalysisOutcome>();
        let state = Arc::new(Mutex::new(EngineState::Idle));
        let hand_back = Arc::new(AtomicBool::new(false));

        let worker = std::thread::spawn({
            let state = state.clone();
            let hand_back = hand_back.clone();
            move || -> Option<S> {
                while let Ok(req) = req_rx.recv() {
                    log::debug!("Sending analysis request {}", req.id);

                    let request_metadata = req.request.metadata();

                    *lock(&state) = EngineState::Processing;
                    let start_time = Instant::now();

                    let result = service.analyze(req.request);
                    let duration = start_time.elapsed();

                    match &result {
                        Ok(_) => log::debug!("Analysis {} completed in {:?}", req.id, duration),
                        Err(err) => log::warn!("Analysis {} failed: {}", req.id, err),
                    }

                    *lock(&state) = EngineState::Idle;

                    let _ = rep_tx.send(AnalysisOutcome {
                        id: req.id,
                        start_time,
                        duration,
                        request_metadata,
                        result,
                    });
                }
                hand_back.load(Ordering::SeqCst).then_some(service)
            }
        });

        Self {
            state,
            req_tx: Some(req_tx),
            rep_rx: Mutex::new(rep_rx),
            worker: Some(worker),
            hand_back,
            id_counter: AtomicU64::new(1),
        }
    }

    /// Returns the current state of the engine.
    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    /// Queues a request and returns its id, or `None` once the engine is stopped.
    pub fn schedule(&self, request: AnalysisRequest) -> Option<u64> {
        let tx = self.req_tx.as_ref()?;
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        match tx.send(EngineRequest { id, request }) {
            Ok(()) => Some(id),
            Err(_) => {
                log::error!("Analysis worker is gone, request {id} dropped");
                None
            }
        }
    }

    /// Retrieves a finished outcome without blocking.
    pub fn try_poll_response(&self) -> EngineResult {
        match lock(&self.rep_rx).try_recv() {
            Ok(outcome) => EngineResult::Completed(outcome),
            Err(mpsc::TryRecvError::Empty) => EngineResult::Empty(self.state()),
            Err(mpsc::TryRecvError::Disconnected) => disconnected(),
        }
    }

    /// Blocks until an outcome arrives or `timeout` elapses.
    ///
    /// `None` waits for as long as the outstanding request takes.
    pub fn wait_response(&self, timeout: Option<Duration>) -> EngineResult {
        let rx = lock(&self.rep_rx);
        match timeout {
            None => match rx.recv() {
                Ok(outcome) => EngineResult::Completed(outcome),
                Err(mpsc::RecvError) => disconnected(),
            },
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(outcome) => EngineResult::Completed(outcome),
                Err(mpsc::RecvTimeoutError::Timeout) => EngineResult::Empty(self.state()),
                Err(mpsc::RecvTimeoutError::Disconnected) => disconnected(),
            },
        }
    }

    /// Closes the request channel and joins the worker, handing back the service.
    ///
    /// Blocks until any request already queued has finished.
    pub fn stop(&mut self) -> Option<S> {
        self.hand_back.store(true, Ordering::SeqCst);
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<S> {
        self.req_tx.take();
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(service) => service,
            Err(_) => {
                log::error!("Analysis worker panicked");
                None
            }
        }
    }
}

fn disconnected() -> EngineResult {
    log::error!("Analysis response channel disconnected");
    EngineResult::Error("analysis worker stopped unexpectedly".to_string())
}

impl<S: AnalysisService + Send + 'static> Drop for AnalysisEngine<S> {
    fn drop(&mut self) {
        // The service is dropped on the worker thread, never on the caller's.
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingService {
        calls: usize,
    }

    impl AnalysisService for CountingService {
        fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult, ServiceError> {
            self.calls += 1;
            if request.file_name == "bad.png" {
                return Err(ServiceError::reported(Some("low image quality".to_string())));
            }
            Ok(AnalysisResult::default())
        }
    }

    fn request(name: &str) -> AnalysisRequest {
        AnalysisRequest::new(name, Arc::from(vec![0u8; 4]))
    }

    #[test]
    fn outcomes_carry_ids_and_metadata() {
        let engine = AnalysisEngine::new(CountingService { calls: 0 });
        let first = engine.schedule(request("a.png")).unwrap();
        let second = engine.schedule(request("bad.png")).unwrap();
        assert!(second > first);

        let EngineResult::Completed(outcome) = engine.wait_response(None) else {
            panic!("expected an outcome");
        };
        assert_eq!(outcome.id, first);
        assert_eq!(outcome.request_metadata.image_len, 4);
        assert!(outcome.result.is_ok());

        let EngineResult::Completed(outcome) = engine.wait_response(None) else {
            panic!("expected an outcome");
        };
        assert_eq!(outcome.id, second);
        assert_eq!(outcome.result.unwrap_err().to_string(), "low image quality");
    }

    #[test]
    fn failures_do_not_stop_the_worker() {
        let mut engine = AnalysisEngine::new(CountingService { calls: 0 });
        engine.schedule(request("bad.png"));
        engine.wait_response(None);
        engine.schedule(request("good.png"));
        let EngineResult::Completed(outcome) = engine.wait_response(None) else {
            panic!("expected an outcome");
        };
        assert!(outcome.result.is_ok());
        assert_eq!(engine.stop().unwrap().calls, 2);
    }

    #[test]
    fn poll_is_empty_when_nothing_scheduled() {
        let engine = AnalysisEngine::new(CountingService { calls: 0 });
        assert!(matches!(
            engine.try_poll_response(),
            EngineResult::Empty(EngineState::Idle)
        ));
        assert!(matches!(
            engine.wait_response(Some(Duration::from_millis(10))),
            EngineResult::Empty(_)
        ));
    }

    struct ThreadTracking {
        dropped_on: Arc<Mutex<Option<std::thread::ThreadId>>>,
    }

    impl AnalysisService for ThreadTracking {
        fn analyze(&mut self, _: AnalysisRequest) -> Result<AnalysisResult, ServiceError> {
            Ok(AnalysisResult::default())
        }
    }

    impl Drop for ThreadTracking {
        fn drop(&mut self) {
            *self.dropped_on.lock().unwrap() = Some(std::thread::current().id());
        }
    }

    #[test]
    fn dropping_engine_drops_service_on_worker() {
        let dropped_on = Arc::new(Mutex::new(None));
        let engine = AnalysisEngine::new(ThreadTracking {
            dropped_on: dropped_on.clone(),
        });
        engine.schedule(request("a.png"));
        engine.wait_response(None);
        drop(engine);

        let dropped_on = dropped_on.lock().unwrap().expect("service was dropped");
        assert_ne!(dropped_on, std::thread::current().id());
    }

    #[test]
    fn stop_hands_service_back() {
        let dropped_on = Arc::new(Mutex::new(None));
        let mut engine = AnalysisEngine::new(ThreadTracking {
            dropped_on: dropped_on.clone(),
        });
        let service = engine.stop().expect("service handed back");
        assert!(dropped_on.lock().unwrap().is_none());
        drop(service);
        assert_eq!(
            *dropped_on.lock().unwrap(),
            Some(std::thread::current().id())
        );
    }

    #[test]
    fn stopped_engine_rejects_requests() {
        let mut engine = AnalysisEngine::new(CountingService { calls: 0 });
        engine.stop();
        assert!(engine.schedule(request("a.png")).is_none());
        assert_eq!(EngineState::Processing.as_str(), "processing");
    }
}

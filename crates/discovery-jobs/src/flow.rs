//! Flow lifecycle: state machine, caller callbacks, and the cancellable
//! handle returned for every running flow.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use discovery_core::{
    DerivedArtifact, Error, EventBus, ExtractedEntity, FlowEvent, JobRequest, JobSnapshot,
    ProgressReport, Result,
};

use crate::poller::JobPoller;

/// How a flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Succeeded,
    /// The remote job failed, a status check failed, polling timed out, or
    /// post-processing failed.
    Failed,
    /// The remote service refused to start a job.
    SubmissionError,
    Cancelled,
}

/// State of a flow's current job.
///
/// ```text
/// Idle -> Submitting -> Polling -> Completed -> PostProcessing -> Done
///                   \           \           \-> Submitting (chained job)
///                    \           \-> Done(Failed)
///                     \-> Done(SubmissionError)
/// ```
///
/// Any non-terminal state may also move to `Done(Failed)` or
/// `Done(Cancelled)`. Nothing leaves `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Submitting,
    Polling,
    Completed,
    PostProcessing,
    Done(FlowOutcome),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done(_))
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use FlowOutcome::*;
        use JobState::*;

        match (*self, next) {
            (Done(_), _) => false,
            (_, Done(Failed)) | (_, Done(Cancelled)) => true,
            (Idle, Submitting) => true,
            (Submitting, Polling) | (Submitting, Done(SubmissionError)) => true,
            (Polling, Completed) => true,
            (Completed, Submitting) | (Completed, PostProcessing) | (Completed, Done(Succeeded)) => {
                true
            }
            (PostProcessing, Done(Succeeded)) => true,
            _ => false,
        }
    }
}

impl From<&Error> for FlowOutcome {
    fn from(err: &Error) -> Self {
        match err {
            Error::Submission(_) => FlowOutcome::SubmissionError,
            Error::Cancelled => FlowOutcome::Cancelled,
            _ => FlowOutcome::Failed,
        }
    }
}

/// Progress callback type for flows.
pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// Caller-supplied callbacks for one flow.
///
/// `on_result` and `on_error` are consumed when the flow ends, so at most
/// one of them ever runs. Neither runs after the flow was cancelled.
pub struct Callbacks<T> {
    progress: Option<ProgressCallback>,
    result: Option<Box<dyn FnOnce(T) + Send>>,
    error: Option<Box<dyn FnOnce(Error) + Send>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            progress: None,
            result: None,
            error: None,
        }
    }
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressReport) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.result = Some(Box::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.error = Some(Box::new(callback));
        self
    }

    /// Deliver the terminal outcome, consuming both terminal callbacks.
    fn finish(self, result: Result<T>) {
        match result {
            Ok(value) => {
                if let Some(callback) = self.result {
                    callback(value);
                }
            }
            Err(err) => {
                if let Some(callback) = self.error {
                    callback(err);
                }
            }
        }
    }
}

/// Output types that can name the file a flow produced.
pub trait FlowOutput: Send + 'static {
    fn derived_file_id(&self) -> Option<i64> {
        None
    }
}

impl FlowOutput for DerivedArtifact {
    fn derived_file_id(&self) -> Option<i64> {
        Some(self.file.id)
    }
}

impl FlowOutput for Vec<ExtractedEntity> {}

/// Owns the state channel and rejects illegal transitions.
struct StateTracker {
    tx: watch::Sender<JobState>,
}

impl StateTracker {
    fn advance(&self, next: JobState) -> bool {
        let mut rejected = None;
        let changed = self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(from) = rejected {
            warn!(from = ?from, to = ?next, "Rejected job state transition");
        }
        changed
    }
}

/// Everything a running flow body needs: progress reporting, state
/// transitions, and event publishing.
#[derive(Clone)]
pub struct FlowContext {
    flow_id: Uuid,
    events: EventBus,
    progress: Option<ProgressCallback>,
    state: Arc<StateTracker>,
    cancel: CancellationToken,
}

impl FlowContext {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress to the caller and the event bus.
    pub fn report_progress(&self, report: ProgressReport) {
        if self.is_cancelled() {
            return;
        }
        debug!(flow_id = %self.flow_id, progress = %report, "Flow progress");
        if let Some(ref callback) = self.progress {
            callback(report.clone());
        }
        self.events.emit(FlowEvent::FlowProgress {
            flow_id: self.flow_id,
            message: report.to_string(),
        });
    }

    pub fn advance(&self, next: JobState) -> bool {
        self.state.advance(next)
    }

    /// Submit a job and poll it to completion, moving through
    /// `Submitting -> Polling -> Completed`.
    pub async fn run_job(&self, poller: &JobPoller, request: JobRequest) -> Result<JobSnapshot> {
        self.advance(JobState::Submitting);
        let job_id = poller.submit(&request).await?;
        self.events.emit(FlowEvent::JobSubmitted {
            flow_id: self.flow_id,
            job_kind: request.kind.to_string(),
            job_id: job_id.to_string(),
        });

        self.advance(JobState::Polling);
        let snapshot = poller.wait(request.kind, &job_id).await?;
        self.advance(JobState::Completed);
        Ok(snapshot)
    }
}

/// Handle to a running flow.
///
/// Dropping the handle detaches the flow; it keeps running and still
/// delivers its callbacks.
pub struct FlowHandle {
    id: Uuid,
    cancel: CancellationToken,
    state: Arc<StateTracker>,
    task: JoinHandle<()>,
}

impl FlowHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Abort the flow. The in-flight request or pending poll delay is
    /// dropped and no further callback is invoked.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        *self.state.tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.tx.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the flow task to end and return its final state.
    ///
    /// A task that died before reaching `Done` is recorded as
    /// `Done(Failed)` so that state watchers are released.
    pub async fn join(self) -> JobState {
        let FlowHandle { id, state, task, .. } = self;
        if let Err(e) = task.await {
            error!(flow_id = %id, error = %e, "Flow task panicked");
            state.advance(JobState::Done(FlowOutcome::Failed));
        }
        let current = *state.tx.borrow();
        current
    }
}

/// Builds and spawns one flow.
pub struct FlowRunner<T> {
    name: &'static str,
    file_id: i64,
    callbacks: Callbacks<T>,
    context: FlowContext,
}

impl<T: FlowOutput> FlowRunner<T> {
    pub fn new(name: &'static str, file_id: i64, events: EventBus, callbacks: Callbacks<T>) -> Self {
        let (tx, _) = watch::channel(JobState::Idle);
        let context = FlowContext {
            flow_id: Uuid::new_v4(),
            events,
            progress: callbacks.progress.clone(),
            state: Arc::new(StateTracker { tx }),
            cancel: CancellationToken::new(),
        };
        Self {
            name,
            file_id,
            callbacks,
            context,
        }
    }

    /// Context for the flow body.
    pub fn context(&self) -> FlowContext {
        self.context.clone()
    }

    /// Spawn `body` on the runtime and return its handle.
    pub fn spawn<F>(self, body: F) -> FlowHandle
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let ctx = self.context;
        let flow_id = ctx.flow_id;
        let cancel = ctx.cancel.clone();
        let state = ctx.state.clone();
        let span = info_span!("flow", flow_id = %flow_id, flow = self.name);

        ctx.events.emit(FlowEvent::FlowStarted {
            flow_id,
            flow: self.name.to_string(),
            file_id: self.file_id,
        });
        info!(flow_id = %flow_id, flow = self.name, file_id = self.file_id, "Flow started");

        let body: BoxFuture<'static, Result<T>> = body.boxed();
        let callbacks = self.callbacks;
        let task = tokio::spawn(drive(ctx, body, callbacks).instrument(span));

        FlowHandle {
            id: flow_id,
            cancel,
            state,
            task,
        }
    }
}

async fn drive<T: FlowOutput>(
    ctx: FlowContext,
    body: BoxFuture<'static, Result<T>>,
    callbacks: Callbacks<T>,
) {
    let started = Instant::now();
    let body = AssertUnwindSafe(body).catch_unwind().map(|outcome| {
        outcome.unwrap_or_else(|payload| {
            Err(Error::Internal(format!(
                "flow panicked: {}",
                panic_message(&*payload)
            )))
        })
    });
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        result = body => Some(result),
    };

    let result = match result {
        Some(result) if !ctx.is_cancelled() => result,
        _ => {
            ctx.advance(JobState::Done(FlowOutcome::Cancelled));
            ctx.events.emit(FlowEvent::FlowCancelled {
                flow_id: ctx.flow_id,
            });
            info!(flow_id = %ctx.flow_id, "Flow cancelled");
            return;
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(ref value) => {
            ctx.advance(JobState::Done(FlowOutcome::Succeeded));
            ctx.events.emit(FlowEvent::FlowCompleted {
                flow_id: ctx.flow_id,
                derived_file_id: value.derived_file_id(),
                duration_ms,
            });
            info!(flow_id = %ctx.flow_id, duration_ms, "Flow completed");
        }
        Err(ref e) => {
            ctx.advance(JobState::Done(FlowOutcome::from(e)));
            ctx.events.emit(FlowEvent::FlowFailed {
                flow_id: ctx.flow_id,
                error: e.to_string(),
            });
            warn!(flow_id = %ctx.flow_id, duration_ms, error = %e, "Flow failed");
        }
    }
    callbacks.finish(result);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_transitions() {
        use FlowOutcome::*;
        use JobState::*;

        assert!(Idle.can_transition_to(Submitting));
        assert!(Submitting.can_transition_to(Polling));
        assert!(Submitting.can_transition_to(Done(SubmissionError)));
        assert!(Polling.can_transition_to(Completed));
        assert!(Polling.can_transition_to(Done(Failed)));
        assert!(Completed.can_transition_to(Submitting));
        assert!(Completed.can_transition_to(PostProcessing));
        assert!(PostProcessing.can_transition_to(Done(Succeeded)));
        assert!(Idle.can_transition_to(Done(Cancelled)));

        assert!(!Idle.can_transition_to(Polling));
        assert!(!Polling.can_transition_to(Done(SubmissionError)));
        assert!(!Polling.can_transition_to(Done(Succeeded)));
        assert!(!Done(Succeeded).can_transition_to(Idle));
        assert!(!Done(Failed).can_transition_to(Done(Cancelled)));
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(
            FlowOutcome::from(&Error::Submission("x".into())),
            FlowOutcome::SubmissionError
        );
        assert_eq!(FlowOutcome::from(&Error::Cancelled), FlowOutcome::Cancelled);
        assert_eq!(
            FlowOutcome::from(&Error::Poll("x".into())),
            FlowOutcome::Failed
        );
    }

    #[test]
    fn test_state_tracker_rejects_leaving_done() {
        let (tx, rx) = watch::channel(JobState::Idle);
        let tracker = StateTracker { tx };
        assert!(tracker.advance(JobState::Done(FlowOutcome::Failed)));
        assert!(!tracker.advance(JobState::Submitting));
        assert_eq!(*rx.borrow(), JobState::Done(FlowOutcome::Failed));
    }

    #[tokio::test]
    async fn test_result_callback_runs_once() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(0));
        let r = results.clone();
        let e = errors.clone();
        let callbacks = Callbacks::new()
            .on_result(move |v: Vec<ExtractedEntity>| r.lock().unwrap().push(v.len()))
            .on_error(move |_| *e.lock().unwrap() += 1);

        let runner = FlowRunner::new("test", 1, EventBus::new(16), callbacks);
        let ctx = runner.context();
        let handle = runner.spawn(async move {
            ctx.advance(JobState::Submitting);
            ctx.advance(JobState::Polling);
            ctx.advance(JobState::Completed);
            Ok(Vec::new())
        });

        assert_eq!(handle.join().await, JobState::Done(FlowOutcome::Succeeded));
        assert_eq!(*results.lock().unwrap(), vec![0]);
        assert_eq!(*errors.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_error_callback_runs_once() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let callbacks = Callbacks::<Vec<ExtractedEntity>>::new()
            .on_result(|_| panic!("result callback must not run"))
            .on_error(move |err| e.lock().unwrap().push(err.to_string()));

        let runner = FlowRunner::new("test", 1, EventBus::new(16), callbacks);
        let handle = runner.spawn(async { Err(Error::Submission("HTTP 500: boom".into())) });

        assert_eq!(
            handle.join().await,
            JobState::Done(FlowOutcome::SubmissionError)
        );
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["Job submission failed: HTTP 500: boom".to_string()]
        );
    }

    #[tokio::test]
    async fn test_panicking_body_reports_failure() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let callbacks = Callbacks::<Vec<ExtractedEntity>>::new()
            .on_result(|_| panic!("result callback must not run"))
            .on_error(move |err| e.lock().unwrap().push(err.to_string()));

        let runner = FlowRunner::new("test", 1, EventBus::new(16), callbacks);
        let handle = runner.spawn(async {
            if true {
                panic!("bad snapshot");
            }
            Ok(Vec::new())
        });
        let mut state = handle.watch_state();

        let seen = *state.wait_for(JobState::is_terminal).await.unwrap();
        assert_eq!(seen, JobState::Done(FlowOutcome::Failed));
        assert_eq!(handle.join().await, JobState::Done(FlowOutcome::Failed));
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["Internal error: flow panicked: bad snapshot".to_string()]
        );
    }

    #[tokio::test]
    async fn test_join_marks_dead_task_failed() {
        let callbacks = Callbacks::<Vec<ExtractedEntity>>::new()
            .on_result(|_| panic!("result callback panicked"));

        let runner = FlowRunner::new("test", 1, EventBus::new(16), callbacks);
        let ctx = runner.context();
        let handle = runner.spawn(async move {
            ctx.advance(JobState::Submitting);
            ctx.advance(JobState::Polling);
            ctx.advance(JobState::Completed);
            Ok(Vec::new())
        });

        // The state reached Done before the callback panicked
        assert_eq!(handle.join().await, JobState::Done(FlowOutcome::Succeeded));

        let (tx, _) = watch::channel(JobState::Polling);
        let tracker = Arc::new(StateTracker { tx });
        let handle = FlowHandle {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            state: tracker,
            task: tokio::spawn(async { panic!("worker died") }),
        };
        let mut state = handle.watch_state();
        assert_eq!(handle.join().await, JobState::Done(FlowOutcome::Failed));
        assert!(state.borrow_and_update().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_callbacks() {
        let fired = Arc::new(Mutex::new(0));
        let (f1, f2, f3) = (fired.clone(), fired.clone(), fired.clone());
        let callbacks = Callbacks::<Vec<ExtractedEntity>>::new()
            .on_progress(move |_| *f1.lock().unwrap() += 1)
            .on_result(move |_| *f2.lock().unwrap() += 1)
            .on_error(move |_| *f3.lock().unwrap() += 1);

        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let runner = FlowRunner::new("test", 1, events, callbacks);
        let ctx = runner.context();
        let handle = runner.spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ctx.report_progress(ProgressReport::phase("late"));
            Ok(Vec::new())
        });

        handle.cancel();
        assert_eq!(handle.join().await, JobState::Done(FlowOutcome::Cancelled));
        assert_eq!(*fired.lock().unwrap(), 0);

        let started = rx.recv().await.unwrap();
        assert_eq!(started.event_type, "flow.started");
        let cancelled = rx.recv().await.unwrap();
        assert_eq!(cancelled.event_type, "flow.cancelled");
    }
}

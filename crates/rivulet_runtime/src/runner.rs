//! Script runner: owns the script thread and drives the run lifecycle.
//!
//! Each session has at most one live script thread. A rerun request either
//! lands in the pending-request cell of the running thread or, when the
//! thread has wound down, spawns a fresh one; the handoff happens under the
//! runner state lock so a request can never fall between a thread deciding
//! to stop and the session noticing. Scripts run on a dedicated OS thread
//! because user code blocks freely; the session listens on an event channel
//! from whatever async context it lives in.

use crate::context::{self, ScriptRunContext};
use crate::fragment::{self, exception_element};
use crate::run_requests::ReadyAction;
use crate::script::{RerunData, ScriptError, ScriptSource};
use rivulet_core::ForwardMsgQueue;
use rivulet_proto::{
    Delta, ForwardMsg, ForwardMsgBody, NewSession, ScriptFinishedStatus, SessionEvent,
    SessionStatus,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;

/// Script thread lifecycle notifications, consumed by the session.
#[derive(Clone, Debug, PartialEq)]
pub enum RunnerEvent {
    ScriptStarted {
        run_id: u64,
        fragment_ids: Vec<String>,
    },
    ScriptStoppedWithSuccess,
    /// The run was cut short so a newer rerun could take over.
    ScriptStoppedForRerun,
    ScriptStoppedWithCompileError {
        message: String,
    },
    FragmentStoppedWithSuccess,
    /// The script thread exited.
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Running,
    Stopped,
}

pub struct RunnerParts {
    pub source: Arc<dyn ScriptSource>,
    pub ctx: ScriptRunContext,
    pub queue: Arc<Mutex<ForwardMsgQueue>>,
    pub events: UnboundedSender<RunnerEvent>,
}

struct RunnerInner {
    source: Arc<dyn ScriptSource>,
    ctx: ScriptRunContext,
    queue: Arc<Mutex<ForwardMsgQueue>>,
    events: UnboundedSender<RunnerEvent>,
    run_counter: AtomicU64,
    state: Mutex<RunnerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ScriptRunner {
    inner: Arc<RunnerInner>,
}

impl ScriptRunner {
    pub fn new(parts: RunnerParts) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                source: parts.source,
                ctx: parts.ctx,
                queue: parts.queue,
                events: parts.events,
                run_counter: AtomicU64::new(0),
                state: Mutex::new(RunnerState::NotStarted),
                thread: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    /// Route a rerun request: into the live thread's pending cell when one
    /// exists, otherwise spawn a fresh script thread seeded with it. A
    /// pending stop wins over the request.
    pub fn request_rerun(&self, data: RerunData) {
        let mut state = self.inner.state.lock().unwrap();
        if *state == RunnerState::Running {
            if !self.inner.ctx.requests().request_rerun(data) {
                tracing::debug!("rerun request discarded, stop pending");
            }
            return;
        }
        *state = RunnerState::Running;
        drop(state);

        let mut thread = self.inner.thread.lock().unwrap();
        if let Some(finished) = thread.take() {
            let _ = finished.join();
        }
        let runner = self.clone();
        *thread = Some(
            std::thread::Builder::new()
                .name("rivulet-script".into())
                .spawn(move || runner.run_loop(data))
                .expect("failed to spawn script thread"),
        );
    }

    /// Ask the live thread to stop. No-op when already stopped. Checked
    /// and posted under the state lock so a stop aimed at a thread that
    /// just wound down cannot leave a stale request in the cell.
    pub fn request_stop(&self) {
        let state = self.inner.state.lock().unwrap();
        if *state == RunnerState::Running {
            self.inner.ctx.requests().request_stop();
        }
    }

    /// Block until the script thread exits. Callers request a stop first.
    pub fn join(&self) {
        let handle = self.inner.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run_loop(&self, initial: RerunData) {
        let mut current = initial;
        loop {
            match self.run_once(current) {
                // An interrupted run chains straight into its successor.
                Some(next) => current = next,
                None => {
                    // Consult the pending cell under the state lock so a
                    // request posted now either chains here or sees
                    // `Stopped` and spawns a new thread.
                    let mut state = self.inner.state.lock().unwrap();
                    match self.inner.ctx.requests().on_scriptrunner_ready() {
                        ReadyAction::Rerun(data) => current = data,
                        ReadyAction::Stop => {
                            *state = RunnerState::Stopped;
                            break;
                        }
                    }
                }
            }
        }
        let _ = self.inner.events.send(RunnerEvent::Shutdown);
        tracing::debug!(session = self.inner.ctx.session_id(), "script thread exiting");
    }

    /// Execute one script run. Returns the data for an immediate successor
    /// run when this one was interrupted by a full rerun request.
    fn run_once(&self, data: RerunData) -> Option<RerunData> {
        let ctx = &self.inner.ctx;
        let fragment_scoped = data.is_fragment_scoped();

        // Compile before touching the queue: a broken script must leave
        // the previous UI standing.
        let mut compiled = match self.inner.source.compile() {
            Ok(compiled) => compiled,
            Err(err) => {
                tracing::error!(error = %err, "script compilation failed");
                self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::SessionEvent(
                    SessionEvent::ScriptCompilationError {
                        message: err.message.clone(),
                    },
                )));
                self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::ScriptFinished(
                    ScriptFinishedStatus::FinishedWithCompileError,
                )));
                let _ = self
                    .inner
                    .events
                    .send(RunnerEvent::ScriptStoppedWithCompileError {
                        message: err.message,
                    });
                return None;
            }
        };

        let run_id = self.inner.run_counter.fetch_add(1, Ordering::SeqCst);
        if !fragment_scoped {
            self.inner.queue.lock().unwrap().clear();
            ctx.session_state().lock().unwrap().begin_run();
        }
        ctx.reset(run_id, fragment_scoped);
        self.apply_page(&data);

        self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::SessionStatusChanged(
            SessionStatus {
                script_is_running: true,
            },
        )));
        self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::NewSession(NewSession {
            session_id: ctx.session_id().to_string(),
            run_id,
            main_script_path: ctx.main_script_path().display().to_string(),
            fragment_ids: data.fragment_ids.clone(),
        })));
        let _ = self.inner.events.send(RunnerEvent::ScriptStarted {
            run_id,
            fragment_ids: data.fragment_ids.clone(),
        });

        let guard = context::attach(ctx.clone());
        // Widget callbacks are user code; a panic in one must land on the
        // same containment path as a panic in the script body.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            ctx.apply_widget_states(&data);
            if fragment_scoped {
                fragment::run_fragment_set(ctx, &data)
            } else {
                compiled.run()
            }
        }));
        drop(guard);

        let (status, event, next) = match outcome {
            Ok(Ok(())) => {
                if fragment_scoped {
                    (
                        ScriptFinishedStatus::FinishedFragmentRun,
                        RunnerEvent::FragmentStoppedWithSuccess,
                        None,
                    )
                } else {
                    (
                        ScriptFinishedStatus::FinishedSuccessfully,
                        RunnerEvent::ScriptStoppedWithSuccess,
                        None,
                    )
                }
            }
            Ok(Err(ScriptError::RerunRequested(next))) => (
                ScriptFinishedStatus::FinishedEarlyForRerun,
                RunnerEvent::ScriptStoppedForRerun,
                Some(*next),
            ),
            Ok(Err(ScriptError::StopRequested)) => (
                ScriptFinishedStatus::FinishedSuccessfully,
                RunnerEvent::ScriptStoppedWithSuccess,
                None,
            ),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "script raised");
                self.render_exception(&err.to_string());
                (
                    ScriptFinishedStatus::FinishedSuccessfully,
                    RunnerEvent::ScriptStoppedWithSuccess,
                    None,
                )
            }
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(error = %message, "script panicked");
                self.render_exception(&message);
                (
                    ScriptFinishedStatus::FinishedSuccessfully,
                    RunnerEvent::ScriptStoppedWithSuccess,
                    None,
                )
            }
        };

        // Pulses never outlive the run that observed them.
        ctx.session_state().lock().unwrap().reset_triggers();
        if !fragment_scoped && next.is_none() {
            ctx.session_state().lock().unwrap().compact_state();
            let declared = ctx.take_declared_fragments();
            ctx.fragments().lock().unwrap().retain_declared(&declared);
        }

        self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::ScriptFinished(status)));
        self.enqueue_lifecycle(ForwardMsg::new(ForwardMsgBody::SessionStatusChanged(
            SessionStatus {
                script_is_running: false,
            },
        )));
        let _ = self.inner.events.send(event);
        next
    }

    /// Make the requested page active, falling back to the main page on
    /// the first run and ignoring unknown hashes.
    fn apply_page(&self, data: &RerunData) {
        let ctx = &self.inner.ctx;
        if let Some(hash) = &data.page_hash {
            if ctx.pages().get_page(hash).is_some() {
                ctx.set_active_page(Some(hash.clone()));
            } else {
                tracing::warn!(page = %hash, "rerun named an unknown page");
            }
        }
        if ctx.active_page().is_none() {
            ctx.set_active_page(Some(ctx.pages().main_page().page_hash.clone()));
        }
    }

    /// Queue the exception element directly, skipping the context's
    /// checkpoint so a pending rerun is not consumed on the error path.
    fn render_exception(&self, message: &str) {
        let path = self.inner.ctx.next_element_path();
        let element = exception_element(&ScriptError::User(anyhow::anyhow!("{message}")));
        self.enqueue_lifecycle(ForwardMsg::delta(path, Delta::NewElement(element), None));
    }

    /// Lifecycle messages bypass the context's legality checks and never
    /// fail the run; an oversize rejection only gets logged.
    fn enqueue_lifecycle(&self, msg: ForwardMsg) {
        if let Err(err) = self.inner.queue.lock().unwrap().enqueue(msg) {
            tracing::error!(error = %err, "failed to enqueue lifecycle message");
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "script panicked".to_string()
    }
}

//! Standalone "does the script run" health check.
//!
//! Used by readiness probes before a server starts accepting sessions: the
//! script runs once against a throwaway context whose output is discarded.
//! The script executes on the blocking pool because user code blocks
//! freely; the timeout is enforced from the async side.

use crate::context::{self, ContextParts, ScriptRunContext};
use crate::fragment::FragmentStorage;
use crate::pages::PagesManager;
use crate::run_requests::ScriptRequests;
use crate::script::ScriptSource;
use rivulet_core::SessionState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptHealth {
    Ok,
    Error(String),
    Timeout,
}

impl ScriptHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, ScriptHealth::Ok)
    }

    /// Short status token for probe responses.
    pub fn status(&self) -> &'static str {
        match self {
            ScriptHealth::Ok => "ok",
            ScriptHealth::Error(_) => "error",
            ScriptHealth::Timeout => "timeout",
        }
    }
}

/// Compile and run the script once, discarding its output.
///
/// Control outcomes (a stop or rerun raised by the script itself) count as
/// healthy; only compile errors, user errors, and panics are failures.
pub async fn check_script_runs(source: Arc<dyn ScriptSource>, timeout: Duration) -> ScriptHealth {
    let run = tokio::task::spawn_blocking(move || run_discarded(source));
    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(health)) => health,
        Ok(Err(join_err)) => ScriptHealth::Error(join_err.to_string()),
        Err(_) => ScriptHealth::Timeout,
    }
}

fn run_discarded(source: Arc<dyn ScriptSource>) -> ScriptHealth {
    let mut compiled = match source.compile() {
        Ok(compiled) => compiled,
        Err(err) => return ScriptHealth::Error(err.to_string()),
    };

    let ctx = ScriptRunContext::new(ContextParts {
        session_id: "health-check".into(),
        main_script_path: source.main_path().to_path_buf(),
        query_string: String::new(),
        enqueue: Arc::new(|_msg| Ok(())),
        session_state: Arc::new(Mutex::new(SessionState::new())),
        fragments: Arc::new(Mutex::new(FragmentStorage::new())),
        uploads: Arc::new(crate::uploads::UploadedFileManager::new()),
        pages: Arc::new(PagesManager::new(
            source.main_path().display().to_string(),
        )),
        requests: Arc::new(ScriptRequests::new()),
        interrupt_on_yield: false,
    });
    ctx.reset(0, false);

    let guard = context::attach(ctx);
    let outcome = catch_unwind(AssertUnwindSafe(|| compiled.run()));
    drop(guard);

    match outcome {
        Ok(Ok(())) => ScriptHealth::Ok,
        Ok(Err(err)) if err.is_control() => ScriptHealth::Ok,
        Ok(Err(err)) => ScriptHealth::Error(err.to_string()),
        Err(_) => ScriptHealth::Error("script panicked".into()),
    }
}

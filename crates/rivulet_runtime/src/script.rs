//! User script abstraction and control-flow signaling.
//!
//! A script is anything that can be compiled into a runnable unit. The
//! standard implementation wraps a Rust closure; the trait boundary exists
//! so embedders can plug in script loaders with a real compile step, and so
//! the compile-error lifecycle path is exercised uniformly.
//!
//! [`ScriptError`] doubles as the control-flow channel: the runner requests
//! interruption by making element calls return a control variant, which the
//! script propagates with `?` back to the runner boundary. Script code must
//! not swallow control variants; [`ScriptError::is_control`] exists so
//! generic error handling can re-raise them.

use rivulet_core::CoreError;
use rivulet_proto::{DeltaPath, WidgetStates};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Payload of a rerun request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RerunData {
    /// Widget values accompanying the request, if any.
    pub widget_states: Option<WidgetStates>,
    /// Fragment ids to rerun in isolation. Empty means full-script run.
    pub fragment_ids: Vec<String>,
    /// Page to make active before the run, if switching.
    pub page_hash: Option<String>,
    /// Set when the client requested the rerun on a fragment's timer
    /// rather than through user interaction.
    pub is_auto_rerun: bool,
}

impl RerunData {
    /// A plain full-script rerun.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn with_widget_states(states: WidgetStates) -> Self {
        Self {
            widget_states: Some(states),
            ..Self::default()
        }
    }

    pub fn for_fragments(fragment_ids: Vec<String>) -> Self {
        Self {
            fragment_ids,
            ..Self::default()
        }
    }

    pub fn is_fragment_scoped(&self) -> bool {
        !self.fragment_ids.is_empty()
    }

    /// Merge a newer request into an older pending one.
    ///
    /// Widget batches merge per [`WidgetStates::coalesce`] (trigger OR,
    /// newer wins otherwise); a batch present on only one side is kept.
    /// Fragment queues union without duplicates, but a full-script request
    /// on either side clears the queue - a full rerun subsumes any pending
    /// fragment-scoped work.
    pub fn coalesce(old: RerunData, new: RerunData) -> RerunData {
        let widget_states = match (old.widget_states, new.widget_states) {
            (Some(o), Some(n)) => Some(WidgetStates::coalesce(&o, &n)),
            (Some(o), None) => Some(o),
            (None, n) => n,
        };

        let fragment_ids = if old.fragment_ids.is_empty() || new.fragment_ids.is_empty() {
            Vec::new()
        } else {
            let mut merged = old.fragment_ids;
            for id in new.fragment_ids {
                if !merged.contains(&id) {
                    merged.push(id);
                }
            }
            merged
        };

        RerunData {
            widget_states,
            fragment_ids,
            page_hash: new.page_hash.or(old.page_hash),
            is_auto_rerun: old.is_auto_rerun && new.is_auto_rerun,
        }
    }
}

/// The user script failed to parse or compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("script failed to compile: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error type of every element call and of a script run as a whole.
///
/// The `RerunRequested` and `StopRequested` variants are control outcomes,
/// not errors: they unwind the user call stack to the runner boundary and
/// never surface past it.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Control outcome: a newer rerun superseded this run.
    #[error("rerun requested")]
    RerunRequested(Box<RerunData>),

    /// Control outcome: the run was told to stop.
    #[error("stop requested")]
    StopRequested,

    /// An element call executed on a thread with no attached run context.
    #[error("no active script run context on this thread")]
    NoActiveContext,

    /// Page configuration was set after the run's first element.
    #[error("page config must be set before the first element of the run")]
    PageConfigAfterContent,

    /// A fragment wrote outside its declared container.
    #[error("fragment '{fragment_id}' wrote outside its container at {path}")]
    FragmentOutsideScope {
        fragment_id: String,
        path: DeltaPath,
    },

    /// Two forms with the same id were opened in one run.
    #[error("duplicate form id '{0}' within one run")]
    DuplicateFormId(String),

    /// A fragment-scoped rerun named an id with no stored closure.
    #[error("no such fragment: {0}")]
    NoSuchFragment(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Uncaught user error; rendered as an exception element.
    #[error(transparent)]
    User(#[from] anyhow::Error),
}

impl ScriptError {
    /// True for the control outcomes the runner consumes at its boundary.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            ScriptError::RerunRequested(_) | ScriptError::StopRequested
        )
    }
}

/// A compiled, runnable script unit. One instance runs once.
pub trait CompiledScript: Send {
    fn run(&mut self) -> Result<(), ScriptError>;
}

/// Something that can be compiled into a runnable script.
pub trait ScriptSource: Send + Sync {
    /// Path used for diagnostics and identity hashing.
    fn main_path(&self) -> &Path;

    /// Prepare a runnable unit. Called once per run, so sources backed by
    /// files pick up on-disk changes between runs.
    fn compile(&self) -> Result<Box<dyn CompiledScript>, CompileError>;
}

type ScriptBody = Arc<dyn Fn() -> Result<(), ScriptError> + Send + Sync>;

/// The standard script source: a Rust closure that always compiles.
pub struct ClosureScript {
    path: PathBuf,
    body: ScriptBody,
}

impl ClosureScript {
    pub fn new<F>(path: impl Into<PathBuf>, body: F) -> Self
    where
        F: Fn() -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            body: Arc::new(body),
        }
    }
}

struct ClosureRun {
    body: ScriptBody,
}

impl CompiledScript for ClosureRun {
    fn run(&mut self) -> Result<(), ScriptError> {
        (self.body)()
    }
}

impl ScriptSource for ClosureScript {
    fn main_path(&self) -> &Path {
        &self.path
    }

    fn compile(&self) -> Result<Box<dyn CompiledScript>, CompileError> {
        Ok(Box::new(ClosureRun {
            body: self.body.clone(),
        }))
    }
}

//! Rivulet Script Execution Engine
//!
//! Runs user scripts top to bottom on a dedicated thread per session and
//! reconciles each run against the client's UI tree:
//!
//! - **Script runner**: compile, run, interrupt, and chain reruns, with a
//!   lifecycle event channel back to the session
//! - **Run context**: element cursors, container stack, fragment scoping,
//!   and the thread-local handle element shims call into
//! - **Fragments**: named regions replayed in isolation from a cursor
//!   snapshot taken at declaration
//! - **Sessions**: one per browser connection, owning the queue, state
//!   registry, and script thread; the [`SessionManager`] routes incoming
//!   messages and retires idle sessions
//!
//! Transports sit on top: feed [`rivulet_proto::BackMsg`] values in through
//! the manager and ship whatever [`Session::flush`] returns to the client.

pub mod config;
pub mod context;
pub mod fragment;
pub mod health;
pub mod pages;
pub mod run_requests;
pub mod runner;
pub mod script;
pub mod session;
pub mod session_manager;
pub mod uploads;

pub use config::RuntimeConfig;
pub use context::{attach, current, ContainerGuard, ContextParts, ScriptRunContext};
pub use fragment::{fragment, FragmentStorage};
pub use health::{check_script_runs, ScriptHealth};
pub use pages::{PageInfo, PagesManager};
pub use run_requests::ScriptRequests;
pub use runner::{RunnerEvent, RunnerState, ScriptRunner};
pub use script::{
    ClosureScript, CompileError, CompiledScript, RerunData, ScriptError, ScriptSource,
};
pub use session::Session;
pub use session_manager::{SessionError, SessionKey, SessionManager};
pub use uploads::{UploadedFile, UploadedFileManager};

//! Per-run script context.
//!
//! One [`ScriptRunContext`] lives for a session's lifetime and is reset at
//! the top of every run. It owns the element cursor (which tree coordinate
//! the next element lands on), the container stack, fragment scoping, and
//! the enqueue path every element call funnels through. Element shims reach
//! it through a thread-local set up by the runner, so user script code
//! never threads a context argument around.

use crate::fragment::FragmentStorage;
use crate::pages::PagesManager;
use crate::run_requests::{Interrupt, ScriptRequests};
use crate::script::{RerunData, ScriptError};
use crate::uploads::UploadedFileManager;
use rivulet_core::{SessionState, WidgetMetadata};
use rivulet_proto::{Block, BlockKind, Delta, DeltaPath, ForwardMsg, ForwardMsgBody, WidgetValue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where enqueued messages go. The session wires this to its forward
/// message queue; tests wire it to a capture buffer.
pub type EnqueueFn = Arc<dyn Fn(ForwardMsg) -> rivulet_core::Result<()> + Send + Sync>;

/// Everything a context needs from its session.
pub struct ContextParts {
    pub session_id: String,
    pub main_script_path: PathBuf,
    pub query_string: String,
    pub enqueue: EnqueueFn,
    pub session_state: Arc<Mutex<SessionState>>,
    pub fragments: Arc<Mutex<FragmentStorage>>,
    pub uploads: Arc<UploadedFileManager>,
    pub pages: Arc<PagesManager>,
    pub requests: Arc<ScriptRequests>,
    /// Honor stop/full-rerun requests at element-call checkpoints.
    pub interrupt_on_yield: bool,
}

/// Element cursor state: the open-container stack plus the next child
/// index under every container seen this run.
#[derive(Clone, Debug, Default)]
struct Cursors {
    stack: Vec<DeltaPath>,
    next_child: FxHashMap<DeltaPath, u32>,
}

impl Cursors {
    fn container(&self) -> DeltaPath {
        self.stack.last().cloned().unwrap_or_default()
    }

    fn peek(&self) -> DeltaPath {
        let container = self.container();
        let index = self.next_child.get(&container).copied().unwrap_or(0);
        container.child(index)
    }

    fn advance(&mut self) -> DeltaPath {
        let container = self.container();
        let index = self.next_child.entry(container.clone()).or_insert(0);
        let path = container.child(*index);
        *index += 1;
        path
    }
}

/// Cursor positions captured at a fragment declaration, replayed when the
/// fragment reruns in isolation.
#[derive(Clone, Debug)]
pub struct CursorSnapshot {
    cursors: Cursors,
}

/// State that resets on every run.
#[derive(Default)]
struct RunState {
    run_id: u64,
    cursors: Cursors,
    form_ids: FxHashSet<String>,
    fragment_ids_declared: Vec<String>,
    /// Page config is only legal before the first delta of a full run.
    page_config_allowed: bool,
    current_fragment_id: Option<String>,
    /// Root container the active fragment must stay within.
    active_fragment_root: Option<DeltaPath>,
}

struct CtxInner {
    session_id: String,
    main_script_path: PathBuf,
    query_string: String,
    enqueue: EnqueueFn,
    session_state: Arc<Mutex<SessionState>>,
    fragments: Arc<Mutex<FragmentStorage>>,
    uploads: Arc<UploadedFileManager>,
    pages: Arc<PagesManager>,
    requests: Arc<ScriptRequests>,
    interrupt_on_yield: bool,
    paused: AtomicBool,
    active_page: Mutex<Option<String>>,
    run: Mutex<RunState>,
}

/// Cheap-to-clone handle on the per-session run context.
#[derive(Clone)]
pub struct ScriptRunContext {
    inner: Arc<CtxInner>,
}

impl ScriptRunContext {
    pub fn new(parts: ContextParts) -> Self {
        Self {
            inner: Arc::new(CtxInner {
                session_id: parts.session_id,
                main_script_path: parts.main_script_path,
                query_string: parts.query_string,
                enqueue: parts.enqueue,
                session_state: parts.session_state,
                fragments: parts.fragments,
                uploads: parts.uploads,
                pages: parts.pages,
                requests: parts.requests,
                interrupt_on_yield: parts.interrupt_on_yield,
                paused: AtomicBool::new(false),
                active_page: Mutex::new(None),
                run: Mutex::new(RunState::default()),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn main_script_path(&self) -> &Path {
        &self.inner.main_script_path
    }

    pub fn query_string(&self) -> &str {
        &self.inner.query_string
    }

    pub fn session_state(&self) -> &Arc<Mutex<SessionState>> {
        &self.inner.session_state
    }

    pub fn fragments(&self) -> &Arc<Mutex<FragmentStorage>> {
        &self.inner.fragments
    }

    pub fn uploads(&self) -> &Arc<UploadedFileManager> {
        &self.inner.uploads
    }

    pub fn pages(&self) -> &Arc<PagesManager> {
        &self.inner.pages
    }

    pub fn requests(&self) -> &Arc<ScriptRequests> {
        &self.inner.requests
    }

    pub fn run_id(&self) -> u64 {
        self.inner.run.lock().unwrap().run_id
    }

    /// Hash of the page this session currently displays, if any.
    pub fn active_page(&self) -> Option<String> {
        self.inner.active_page.lock().unwrap().clone()
    }

    pub fn set_active_page(&self, page_hash: Option<String>) {
        *self.inner.active_page.lock().unwrap() = page_hash;
    }

    /// Reset run-scoped state at the top of a run. Page config is only
    /// legal on full runs, where the tree starts empty.
    pub fn reset(&self, run_id: u64, fragment_scoped: bool) {
        let mut run = self.inner.run.lock().unwrap();
        *run = RunState {
            run_id,
            page_config_allowed: !fragment_scoped,
            ..RunState::default()
        };
    }

    /// Fragment ids declared during the run now ending. The runner prunes
    /// stored fragments that were not re-declared.
    pub fn take_declared_fragments(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.run.lock().unwrap().fragment_ids_declared)
    }

    pub fn note_fragment_declared(&self, id: &str) {
        let mut run = self.inner.run.lock().unwrap();
        if !run.fragment_ids_declared.iter().any(|d| d == id) {
            run.fragment_ids_declared.push(id.to_string());
        }
    }

    /// The coordinate the next element will land on, without advancing.
    pub fn peek_next_path(&self) -> DeltaPath {
        self.inner.run.lock().unwrap().cursors.peek()
    }

    /// Allocate the next element coordinate in the current container.
    pub fn next_element_path(&self) -> DeltaPath {
        self.inner.run.lock().unwrap().cursors.advance()
    }

    /// Open a container block: allocates a coordinate, queues the block
    /// delta, and makes the new block the current container until the
    /// returned guard drops.
    pub fn open_container(&self, kind: BlockKind) -> Result<ContainerGuard, ScriptError> {
        if let BlockKind::Form { form_id } = &kind {
            let mut run = self.inner.run.lock().unwrap();
            if !run.form_ids.insert(form_id.clone()) {
                return Err(ScriptError::DuplicateFormId(form_id.clone()));
            }
        }

        let path = self.next_element_path();
        self.enqueue_at(path.clone(), Delta::AddBlock(Block { kind }))?;
        self.inner.run.lock().unwrap().cursors.stack.push(path.clone());
        Ok(ContainerGuard {
            ctx: self.clone(),
            path,
        })
    }

    /// Register widget metadata and return the widget's current value.
    pub fn register_widget(&self, metadata: WidgetMetadata) -> Result<WidgetValue, ScriptError> {
        let id = metadata.id.clone();
        let mut state = self.inner.session_state.lock().unwrap();
        state.set_metadata(metadata);
        Ok(state.get(&id)?)
    }

    /// Queue a delta at an explicit coordinate. Every element call lands
    /// here: checks for pending interrupts, enforces the active fragment
    /// boundary, tags the delta with the fragment scope, and closes the
    /// page-config window.
    pub fn enqueue_at(&self, path: DeltaPath, delta: Delta) -> Result<(), ScriptError> {
        self.checkpoint()?;

        let fragment_id = {
            let mut run = self.inner.run.lock().unwrap();
            if let Some(root) = &run.active_fragment_root {
                if !path.starts_with(root) {
                    let fragment_id = run.current_fragment_id.clone().unwrap_or_default();
                    return Err(ScriptError::FragmentOutsideScope { fragment_id, path });
                }
            }
            run.page_config_allowed = false;
            run.current_fragment_id.clone()
        };

        (self.inner.enqueue)(ForwardMsg::delta(path, delta, fragment_id))?;
        Ok(())
    }

    /// Queue a non-delta message. Page config is rejected once any delta
    /// has been queued this run.
    pub fn enqueue_msg(&self, msg: ForwardMsg) -> Result<(), ScriptError> {
        if matches!(msg.body, ForwardMsgBody::PageConfigChanged(_)) {
            let run = self.inner.run.lock().unwrap();
            if !run.page_config_allowed {
                return Err(ScriptError::PageConfigAfterContent);
            }
        }
        (self.inner.enqueue)(msg)?;
        Ok(())
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Block while the session is paused. Stop requests still get through;
    /// anything else waits for unpause.
    fn pause_gate(&self) -> Result<(), ScriptError> {
        while self.inner.paused.load(Ordering::SeqCst) {
            if matches!(self.inner.requests.interrupt(), Some(Interrupt::Stop)) {
                return Err(ScriptError::StopRequested);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Element-call checkpoint: honors the pause gate, then surfaces any
    /// pending stop or full rerun as a control outcome.
    pub fn checkpoint(&self) -> Result<(), ScriptError> {
        self.pause_gate()?;
        if !self.inner.interrupt_on_yield {
            return Ok(());
        }
        match self.inner.requests.interrupt() {
            Some(Interrupt::Stop) => Err(ScriptError::StopRequested),
            Some(Interrupt::Rerun(data)) => Err(ScriptError::RerunRequested(Box::new(data))),
            None => Ok(()),
        }
    }

    /// Explicit yield point for long-running scripts: services pending
    /// fragment-scoped reruns inline, then checkpoints.
    pub fn on_yield(&self) -> Result<(), ScriptError> {
        self.pause_gate()?;
        if let Some(data) = self.inner.requests.on_scriptrunner_yield() {
            tracing::debug!(fragments = ?data.fragment_ids, "servicing fragment rerun at yield");
            self.apply_widget_states(&data);
            crate::fragment::run_fragment_set(self, &data)?;
        }
        self.checkpoint()
    }

    /// Ingest a rerun request's widget batch and dispatch change callbacks.
    /// The registry lock is released before dispatch, so callbacks may read
    /// widget values back through the registry.
    pub fn apply_widget_states(&self, data: &RerunData) {
        if let Some(states) = &data.widget_states {
            let callbacks = {
                let mut state = self.inner.session_state.lock().unwrap();
                state.set_from_proto(states);
                state.due_callbacks()
            };
            for callback in callbacks {
                callback();
            }
        }
    }

    /// Capture cursor positions for later fragment replay.
    pub fn snapshot_cursors(&self) -> CursorSnapshot {
        CursorSnapshot {
            cursors: self.inner.run.lock().unwrap().cursors.clone(),
        }
    }

    pub fn restore_cursors(&self, snapshot: &CursorSnapshot) {
        self.inner.run.lock().unwrap().cursors = snapshot.cursors.clone();
    }

    /// Enter a fragment scope; returns the previous scope for restore.
    pub fn enter_fragment(
        &self,
        id: String,
        root: DeltaPath,
    ) -> (Option<String>, Option<DeltaPath>) {
        let mut run = self.inner.run.lock().unwrap();
        (
            run.current_fragment_id.replace(id),
            run.active_fragment_root.replace(root),
        )
    }

    pub fn exit_fragment(&self, prev: (Option<String>, Option<DeltaPath>)) {
        let mut run = self.inner.run.lock().unwrap();
        run.current_fragment_id = prev.0;
        run.active_fragment_root = prev.1;
    }

    pub fn current_fragment_id(&self) -> Option<String> {
        self.inner.run.lock().unwrap().current_fragment_id.clone()
    }
}

/// Keeps a container current for its lexical scope; pops on drop.
pub struct ContainerGuard {
    ctx: ScriptRunContext,
    path: DeltaPath,
}

impl ContainerGuard {
    pub fn path(&self) -> &DeltaPath {
        &self.path
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let mut run = self.ctx.inner.run.lock().unwrap();
        if run.cursors.stack.last() == Some(&self.path) {
            run.cursors.stack.pop();
        }
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<ScriptRunContext>> = const { RefCell::new(Vec::new()) };
}

/// The context attached to the calling thread. Element shims call this;
/// it fails when invoked outside a script run.
pub fn current() -> Result<ScriptRunContext, ScriptError> {
    ACTIVE.with(|active| {
        active
            .borrow()
            .last()
            .cloned()
            .ok_or(ScriptError::NoActiveContext)
    })
}

/// Attach a context to the calling thread for the guard's lifetime.
pub fn attach(ctx: ScriptRunContext) -> AttachGuard {
    ACTIVE.with(|active| active.borrow_mut().push(ctx));
    AttachGuard { _private: () }
}

pub struct AttachGuard {
    _private: (),
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_proto::Element;

    fn capture_ctx() -> (ScriptRunContext, Arc<Mutex<Vec<ForwardMsg>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let ctx = ScriptRunContext::new(ContextParts {
            session_id: "test-session".into(),
            main_script_path: "app.rs".into(),
            query_string: String::new(),
            enqueue: Arc::new(move |msg| {
                sink.lock().unwrap().push(msg);
                Ok(())
            }),
            session_state: Arc::new(Mutex::new(SessionState::new())),
            fragments: Arc::new(Mutex::new(FragmentStorage::new())),
            uploads: Arc::new(UploadedFileManager::new()),
            pages: Arc::new(PagesManager::new("app.rs")),
            requests: Arc::new(ScriptRequests::new()),
            interrupt_on_yield: true,
        });
        ctx.reset(0, false);
        (ctx, captured)
    }

    fn text_delta(body: &str) -> Delta {
        Delta::NewElement(Element::new("text", serde_json::json!({ "body": body })))
    }

    #[test]
    fn test_cursor_advances_per_container() {
        let (ctx, _) = capture_ctx();
        assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([0]));
        assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([1]));
        assert_eq!(ctx.peek_next_path(), DeltaPath::from_indices([2]));
        // Peek does not consume.
        assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([2]));
    }

    #[test]
    fn test_container_guard_scopes_cursor() {
        let (ctx, captured) = capture_ctx();
        ctx.next_element_path();

        {
            let guard = ctx.open_container(BlockKind::Vertical).unwrap();
            assert_eq!(guard.path(), &DeltaPath::from_indices([1]));
            assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([1, 0]));
            assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([1, 1]));
        }

        // Back in the root container after the guard drops.
        assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([2]));
        let msgs = captured.lock().unwrap();
        assert!(msgs[0].as_delta().unwrap().delta.is_add_block());
    }

    #[test]
    fn test_duplicate_form_id_rejected() {
        let (ctx, _) = capture_ctx();
        let _a = ctx
            .open_container(BlockKind::Form {
                form_id: "settings".into(),
            })
            .unwrap();
        let result = ctx.open_container(BlockKind::Form {
            form_id: "settings".into(),
        });
        assert!(matches!(result, Err(ScriptError::DuplicateFormId(_))));
    }

    #[test]
    fn test_fragment_boundary_enforced() {
        let (ctx, _) = capture_ctx();
        let root = DeltaPath::from_indices([0]);
        let prev = ctx.enter_fragment("frag".into(), root.clone());

        assert!(ctx.enqueue_at(root.child(0), text_delta("in")).is_ok());
        let out = ctx.enqueue_at(DeltaPath::from_indices([1]), text_delta("out"));
        assert!(matches!(
            out,
            Err(ScriptError::FragmentOutsideScope { .. })
        ));

        ctx.exit_fragment(prev);
        assert!(ctx
            .enqueue_at(DeltaPath::from_indices([1]), text_delta("ok"))
            .is_ok());
    }

    #[test]
    fn test_deltas_tagged_with_fragment_scope() {
        let (ctx, captured) = capture_ctx();
        let prev = ctx.enter_fragment("frag".into(), DeltaPath::root());
        ctx.enqueue_at(ctx.next_element_path(), text_delta("x")).unwrap();
        ctx.exit_fragment(prev);
        ctx.enqueue_at(ctx.next_element_path(), text_delta("y")).unwrap();

        let msgs = captured.lock().unwrap();
        assert_eq!(msgs[0].as_delta().unwrap().fragment_id.as_deref(), Some("frag"));
        assert_eq!(msgs[1].as_delta().unwrap().fragment_id, None);
    }

    #[test]
    fn test_page_config_window_closes_at_first_delta() {
        let (ctx, _) = capture_ctx();
        let config = ForwardMsg::new(ForwardMsgBody::PageConfigChanged(Default::default()));
        assert!(ctx.enqueue_msg(config.clone()).is_ok());

        ctx.enqueue_at(ctx.next_element_path(), text_delta("x")).unwrap();
        assert!(matches!(
            ctx.enqueue_msg(config),
            Err(ScriptError::PageConfigAfterContent)
        ));
    }

    #[test]
    fn test_page_config_rejected_in_fragment_runs() {
        let (ctx, _) = capture_ctx();
        ctx.reset(1, true);
        let config = ForwardMsg::new(ForwardMsgBody::PageConfigChanged(Default::default()));
        assert!(matches!(
            ctx.enqueue_msg(config),
            Err(ScriptError::PageConfigAfterContent)
        ));
    }

    #[test]
    fn test_checkpoint_surfaces_interrupts() {
        let (ctx, _) = capture_ctx();
        assert!(ctx.checkpoint().is_ok());

        ctx.requests().request_rerun(RerunData::full());
        assert!(matches!(
            ctx.checkpoint(),
            Err(ScriptError::RerunRequested(_))
        ));

        ctx.requests().request_stop();
        assert!(matches!(ctx.checkpoint(), Err(ScriptError::StopRequested)));
    }

    #[test]
    fn test_callbacks_dispatch_with_registry_unlocked() {
        use rivulet_proto::{ValueKind, WidgetStates, WidgetValue};

        let (ctx, _) = capture_ctx();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let registry = ctx.session_state().clone();
        ctx.session_state().lock().unwrap().set_metadata(
            WidgetMetadata::new("n", ValueKind::Int).with_callback(move || {
                // Reading back through the registry must not deadlock.
                let value = registry.lock().unwrap().get("n").unwrap();
                seen_in_callback.lock().unwrap().push(value);
            }),
        );

        let mut states = WidgetStates::new();
        states.set("n", WidgetValue::Int(5));
        ctx.apply_widget_states(&RerunData::with_widget_states(states));
        assert_eq!(*seen.lock().unwrap(), vec![WidgetValue::Int(5)]);
    }

    #[test]
    fn test_snapshot_restores_cursor_positions() {
        let (ctx, _) = capture_ctx();
        ctx.next_element_path();
        ctx.next_element_path();
        let snapshot = ctx.snapshot_cursors();

        ctx.next_element_path();
        ctx.next_element_path();
        ctx.restore_cursors(&snapshot);
        assert_eq!(ctx.next_element_path(), DeltaPath::from_indices([2]));
    }

    #[test]
    fn test_thread_local_attach() {
        assert!(matches!(current(), Err(ScriptError::NoActiveContext)));
        let (ctx, _) = capture_ctx();
        {
            let _guard = attach(ctx);
            assert!(current().is_ok());
            assert_eq!(current().unwrap().session_id(), "test-session");
        }
        assert!(matches!(current(), Err(ScriptError::NoActiveContext)));
    }
}

//! Fragments: named script regions that can rerun without the full script.
//!
//! Declaring a fragment during a full run opens a container for it, runs
//! the body inside that container, and stores the body closure together
//! with a cursor snapshot taken at the container mouth. A fragment-scoped
//! rerun replays the stored closure against the restored snapshot, so
//! every element lands on the same tree coordinate it had in the full run
//! and replaces in place on the client.

use crate::context::{CursorSnapshot, ScriptRunContext};
use crate::script::{RerunData, ScriptError};
use rivulet_core::ids;
use rivulet_proto::{AutoRerun, BlockKind, Delta, DeltaPath, Element, ForwardMsg, ForwardMsgBody};
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub type FragmentFn = Arc<dyn Fn() -> Result<(), ScriptError> + Send + Sync>;

/// A declared fragment, ready for isolated replay.
#[derive(Clone)]
pub struct StoredFragment {
    func: FragmentFn,
    /// Cursor state at the container mouth, captured at declaration.
    snapshot: CursorSnapshot,
    root: DeltaPath,
    auto_rerun_secs: Option<f64>,
    /// Page the fragment was declared on; replays on other pages skip.
    page_hash: Option<String>,
}

/// Per-session registry of declared fragments.
#[derive(Default)]
pub struct FragmentStorage {
    fragments: FxHashMap<String, StoredFragment>,
}

impl FragmentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: String, fragment: StoredFragment) {
        self.fragments.insert(id, fragment);
    }

    pub fn get(&self, id: &str) -> Option<StoredFragment> {
        self.fragments.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fragments.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<StoredFragment> {
        self.fragments.remove(id)
    }

    /// Drop fragments not re-declared by the run that just completed.
    pub fn retain_declared(&mut self, declared: &[String]) {
        self.fragments.retain(|id, _| declared.iter().any(|d| d == id));
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Declare a fragment at the current cursor position and run its body.
///
/// Identity comes from the user key when given, otherwise from the
/// declaration position, so an unkeyed fragment that moves gets a new id.
/// Returns the fragment id.
pub fn fragment<F>(
    key: Option<&str>,
    auto_rerun_secs: Option<f64>,
    body: F,
) -> Result<String, ScriptError>
where
    F: Fn() -> Result<(), ScriptError> + Send + Sync + 'static,
{
    let ctx = crate::context::current()?;
    let script = ctx.main_script_path().display().to_string();
    let id = match key {
        Some(key) => ids::stable_id("fragment", &[&script, key]),
        None => ids::stable_id("fragment", &[&script, &ctx.peek_next_path().to_string()]),
    };
    ctx.note_fragment_declared(&id);

    let guard = ctx.open_container(BlockKind::Vertical)?;
    let root = guard.path().clone();
    // Snapshot with the container open and its child cursor at zero, so a
    // replay lands elements exactly where the declaration run put them.
    let snapshot = ctx.snapshot_cursors();

    let func: FragmentFn = Arc::new(body);
    let prev = ctx.enter_fragment(id.clone(), root.clone());
    let result = (func)();
    ctx.exit_fragment(prev);
    drop(guard);
    result?;

    ctx.fragments().lock().unwrap().set(
        id.clone(),
        StoredFragment {
            func,
            snapshot,
            root,
            auto_rerun_secs,
            page_hash: ctx.active_page(),
        },
    );

    if let Some(interval_secs) = auto_rerun_secs {
        ctx.enqueue_msg(ForwardMsg::new(ForwardMsgBody::AutoRerun(AutoRerun {
            interval_secs,
            fragment_id: id.clone(),
        })))?;
    }

    Ok(id)
}

/// Replay a set of stored fragments for a fragment-scoped rerun.
///
/// Fragments whose id is unknown (for example, dropped by an intervening
/// full run) are skipped with a warning rather than failing the whole set,
/// as are fragments declared on a page other than the active one. A user
/// error inside one fragment renders as an exception element in that
/// fragment's container and does not stop the remaining fragments; control
/// outcomes propagate immediately.
pub fn run_fragment_set(ctx: &ScriptRunContext, data: &RerunData) -> Result<(), ScriptError> {
    let active_page = ctx.active_page();
    for id in &data.fragment_ids {
        // Clone out so the storage lock is not held while the body runs.
        let Some(stored) = ctx.fragments().lock().unwrap().get(id) else {
            tracing::warn!(fragment = %id, "skipping rerun of unknown fragment");
            continue;
        };
        if stored.page_hash != active_page {
            tracing::debug!(fragment = %id, "skipping fragment from inactive page");
            continue;
        }

        let saved = ctx.snapshot_cursors();
        ctx.restore_cursors(&stored.snapshot);
        let prev = ctx.enter_fragment(id.clone(), stored.root.clone());
        let result = (stored.func)();
        ctx.exit_fragment(prev);

        match result {
            Ok(()) => {
                if let Some(interval_secs) = stored.auto_rerun_secs {
                    ctx.enqueue_msg(ForwardMsg::new(ForwardMsgBody::AutoRerun(AutoRerun {
                        interval_secs,
                        fragment_id: id.clone(),
                    })))?;
                }
            }
            Err(err) if err.is_control() => {
                ctx.restore_cursors(&saved);
                return Err(err);
            }
            Err(err) => {
                tracing::error!(fragment = %id, error = %err, "fragment raised");
                let prev = ctx.enter_fragment(id.clone(), stored.root.clone());
                ctx.enqueue_at(
                    stored.root.child(0),
                    Delta::NewElement(exception_element(&err)),
                )?;
                ctx.exit_fragment(prev);
            }
        }
        ctx.restore_cursors(&saved);
    }
    Ok(())
}

/// Element shown in place of output when script code raises.
pub(crate) fn exception_element(err: &ScriptError) -> Element {
    Element::new(
        "exception",
        serde_json::json!({ "message": err.to_string() }),
    )
}

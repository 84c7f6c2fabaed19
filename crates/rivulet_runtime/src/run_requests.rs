//! Pending-request state shared between a session and its script thread.
//!
//! A session posts stop/rerun requests from the event side; the script
//! thread consumes them at three well-defined points: element-call
//! checkpoints ([`ScriptRequests::interrupt`]), explicit yields inside a
//! run ([`ScriptRequests::on_scriptrunner_yield`]), and run completion
//! ([`ScriptRequests::on_scriptrunner_ready`]). Requests posted while a
//! run is in flight coalesce rather than queue, so at most one pending
//! rerun exists at any time.

use crate::script::RerunData;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum RequestState {
    /// No pending request; the current run proceeds.
    Continue,
    /// A rerun supersedes the current (or just-finished) run.
    Rerun(RerunData),
    /// The script thread should wind down.
    Stop,
}

/// What the script thread does after a run completes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyAction {
    Rerun(RerunData),
    Stop,
}

/// What an in-flight run does at an element-call checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    Rerun(RerunData),
    Stop,
}

/// Shared pending-request cell. One per script thread.
#[derive(Debug)]
pub struct ScriptRequests {
    state: Mutex<RequestState>,
}

impl Default for ScriptRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRequests {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RequestState::Continue),
        }
    }

    /// Post a stop request. Unconditional: a stop discards any pending
    /// rerun and cannot itself be downgraded.
    pub fn request_stop(&self) {
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, RequestState::Stop) {
            tracing::debug!("stop requested, discarding pending state");
        }
        *state = RequestState::Stop;
    }

    /// Post a rerun request. Returns false (and drops the request) if a
    /// stop is already pending; coalesces into any pending rerun.
    pub fn request_rerun(&self, data: RerunData) -> bool {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, RequestState::Continue) {
            RequestState::Stop => {
                *state = RequestState::Stop;
                false
            }
            RequestState::Continue => {
                *state = RequestState::Rerun(data);
                true
            }
            RequestState::Rerun(pending) => {
                *state = RequestState::Rerun(RerunData::coalesce(pending, data));
                true
            }
        }
    }

    /// Consulted at explicit yield points inside a run. Takes a pending
    /// fragment-scoped rerun so it can be serviced inline without
    /// restarting the whole script; full reruns and stops are left for
    /// the checkpoint / completion paths.
    pub fn on_scriptrunner_yield(&self) -> Option<RerunData> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            RequestState::Rerun(data) if data.is_fragment_scoped() => {
                let data = data.clone();
                *state = RequestState::Continue;
                Some(data)
            }
            _ => None,
        }
    }

    /// Consulted when a run completes. A pending rerun chains into the
    /// next run; anything else (including no request at all) stops the
    /// script thread.
    pub fn on_scriptrunner_ready(&self) -> ReadyAction {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, RequestState::Continue) {
            RequestState::Rerun(data) => ReadyAction::Rerun(data),
            RequestState::Continue | RequestState::Stop => {
                *state = RequestState::Continue;
                ReadyAction::Stop
            }
        }
    }

    /// Consulted at element-call checkpoints of an in-flight run. A stop
    /// or a pending full rerun interrupts the run; a fragment-scoped
    /// rerun does not (it is serviced at the next yield instead). A stop
    /// stays pending so the completion path also sees it.
    pub fn interrupt(&self) -> Option<Interrupt> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            RequestState::Stop => Some(Interrupt::Stop),
            RequestState::Rerun(data) if !data.is_fragment_scoped() => {
                let data = data.clone();
                *state = RequestState::Continue;
                Some(Interrupt::Rerun(data))
            }
            _ => None,
        }
    }

    #[cfg(test)]
    fn is_continue(&self) -> bool {
        matches!(*self.state.lock().unwrap(), RequestState::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_proto::{WidgetStates, WidgetValue};

    #[test]
    fn test_ready_with_no_request_stops() {
        let requests = ScriptRequests::new();
        assert_eq!(requests.on_scriptrunner_ready(), ReadyAction::Stop);
        assert!(requests.is_continue());
    }

    #[test]
    fn test_rerun_chains_at_ready() {
        let requests = ScriptRequests::new();
        assert!(requests.request_rerun(RerunData::full()));
        assert_eq!(
            requests.on_scriptrunner_ready(),
            ReadyAction::Rerun(RerunData::full())
        );
        // Consumed.
        assert_eq!(requests.on_scriptrunner_ready(), ReadyAction::Stop);
    }

    #[test]
    fn test_stop_discards_pending_rerun() {
        let requests = ScriptRequests::new();
        assert!(requests.request_rerun(RerunData::full()));
        requests.request_stop();
        assert!(!requests.request_rerun(RerunData::full()));
        assert_eq!(requests.on_scriptrunner_ready(), ReadyAction::Stop);
    }

    #[test]
    fn test_back_to_back_reruns_coalesce() {
        let requests = ScriptRequests::new();
        let mut first = WidgetStates::new();
        first.set("a", WidgetValue::Trigger(true));
        let mut second = WidgetStates::new();
        second.set("a", WidgetValue::Trigger(false));
        second.set("b", WidgetValue::Int(3));

        assert!(requests.request_rerun(RerunData::with_widget_states(first)));
        assert!(requests.request_rerun(RerunData::with_widget_states(second)));

        match requests.on_scriptrunner_ready() {
            ReadyAction::Rerun(data) => {
                let states = data.widget_states.unwrap();
                // Trigger pulse from the first request survives the merge.
                assert_eq!(states.get("a"), Some(&WidgetValue::Trigger(true)));
                assert_eq!(states.get("b"), Some(&WidgetValue::Int(3)));
            }
            other => panic!("expected rerun, got {other:?}"),
        }
    }

    #[test]
    fn test_interrupt_takes_full_rerun_only() {
        let requests = ScriptRequests::new();
        assert!(requests.interrupt().is_none());

        requests.request_rerun(RerunData::for_fragments(vec!["f".into()]));
        assert!(requests.interrupt().is_none());
        // Still pending for the yield path.
        assert!(requests.on_scriptrunner_yield().is_some());

        requests.request_rerun(RerunData::full());
        assert_eq!(
            requests.interrupt(),
            Some(Interrupt::Rerun(RerunData::full()))
        );
        assert!(requests.is_continue());
    }

    #[test]
    fn test_interrupt_leaves_stop_pending() {
        let requests = ScriptRequests::new();
        requests.request_stop();
        assert_eq!(requests.interrupt(), Some(Interrupt::Stop));
        // The completion path still sees the stop.
        assert_eq!(requests.on_scriptrunner_ready(), ReadyAction::Stop);
    }

    #[test]
    fn test_yield_ignores_full_rerun() {
        let requests = ScriptRequests::new();
        requests.request_rerun(RerunData::full());
        assert!(requests.on_scriptrunner_yield().is_none());
        // Untouched for the checkpoint path.
        assert!(requests.interrupt().is_some());
    }
}

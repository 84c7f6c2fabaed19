//! Outgoing and incoming session messages.

use crate::delta::{Delta, DeltaPath};
use crate::widget_states::WidgetStates;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::OnceLock;

/// Metadata sent when a script run begins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub session_id: String,
    /// Monotonic per-session run counter.
    pub run_id: u64,
    pub main_script_path: String,
    /// Fragment ids this run is scoped to. Empty for a full-script run.
    pub fragment_ids: Vec<String>,
}

/// How a script run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptFinishedStatus {
    FinishedSuccessfully,
    FinishedWithCompileError,
    /// The run was interrupted so a newer rerun could start.
    FinishedEarlyForRerun,
    FinishedFragmentRun,
}

/// Current session execution status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub script_is_running: bool,
}

/// Out-of-band session notifications.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The script changed on disk and `run_on_save` is off; the front end
    /// may offer a manual rerun.
    ScriptChangedOnDisk,
    ScriptCompilationError { message: String },
}

/// Page configuration. Only legal before the first element of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    pub title: Option<String>,
    #[serde(default)]
    pub wide_layout: bool,
}

/// Instructs the client to request a fragment-scoped rerun after a delay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoRerun {
    pub interval_secs: f64,
    pub fragment_id: String,
}

/// Lightweight stand-in for a payload the client already holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedMsgRef {
    /// Content hash of the replaced message.
    pub hash: String,
    /// Serialized size of the replaced message, as a checksum the client
    /// can validate its cached copy against.
    pub size: u64,
}

/// A delta plus its tree coordinate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaMsg {
    pub path: DeltaPath,
    pub delta: Delta,
    /// Set when the delta was produced inside a fragment scope.
    pub fragment_id: Option<String>,
}

/// Body of an outgoing message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ForwardMsgBody {
    Delta(DeltaMsg),
    NewSession(NewSession),
    ScriptFinished(ScriptFinishedStatus),
    SessionStatusChanged(SessionStatus),
    SessionEvent(SessionEvent),
    PageConfigChanged(PageConfig),
    AutoRerun(AutoRerun),
    /// Replacement for a cached payload the session was already sent.
    Ref(CachedMsgRef),
}

/// An outgoing render or lifecycle instruction.
///
/// The content hash is computed on first use and memoized; it only matters
/// for messages the cache considers, so most messages never pay for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForwardMsg {
    pub body: ForwardMsgBody,
    #[serde(skip)]
    hash: OnceLock<String>,
}

impl PartialEq for ForwardMsg {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl ForwardMsg {
    pub fn new(body: ForwardMsgBody) -> Self {
        Self {
            body,
            hash: OnceLock::new(),
        }
    }

    /// Convenience constructor for a delta message.
    pub fn delta(path: DeltaPath, delta: Delta, fragment_id: Option<String>) -> Self {
        Self::new(ForwardMsgBody::Delta(DeltaMsg {
            path,
            delta,
            fragment_id,
        }))
    }

    /// The delta path, if this is a delta message.
    pub fn delta_path(&self) -> Option<&DeltaPath> {
        match &self.body {
            ForwardMsgBody::Delta(d) => Some(&d.path),
            _ => None,
        }
    }

    pub fn as_delta(&self) -> Option<&DeltaMsg> {
        match &self.body {
            ForwardMsgBody::Delta(d) => Some(d),
            _ => None,
        }
    }

    /// True for message kinds worth deduplicating across reruns. Only data
    /// deltas qualify; lifecycle messages are small and run-specific.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            &self.body,
            ForwardMsgBody::Delta(DeltaMsg {
                delta: Delta::NewElement(_) | Delta::AddRows { .. },
                ..
            })
        )
    }

    /// Serialized size of the message body in bytes.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(&self.body).map(|b| b.len()).unwrap_or(0)
    }

    /// Stable content hash of the message body, memoized after first call.
    pub fn content_hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let bytes = serde_json::to_vec(&self.body).unwrap_or_default();
            let mut hasher = DefaultHasher::new();
            hasher.write(&bytes);
            format!("{:016x}", hasher.finish())
        })
    }
}

/// An incoming browser event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BackMsg {
    /// Request a rerun with the given widget values. An empty
    /// `fragment_ids` list requests a full-script run.
    Rerun {
        widget_states: Option<WidgetStates>,
        #[serde(default)]
        fragment_ids: Vec<String>,
        #[serde(default)]
        page_hash: Option<String>,
    },
    StopScript,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Element;

    fn text_msg(body: &str) -> ForwardMsg {
        ForwardMsg::delta(
            DeltaPath::from_indices([0]),
            Delta::NewElement(Element::new("text", serde_json::json!({ "body": body }))),
            None,
        )
    }

    #[test]
    fn test_content_hash_is_stable_and_content_sensitive() {
        let a = text_msg("hello");
        let b = text_msg("hello");
        let c = text_msg("goodbye");

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        // Memoized value survives repeated calls.
        assert_eq!(a.content_hash(), a.content_hash());
    }

    #[test]
    fn test_cacheable_kinds() {
        assert!(text_msg("x").is_cacheable());

        let block = ForwardMsg::delta(
            DeltaPath::root(),
            Delta::AddBlock(crate::delta::Block {
                kind: crate::delta::BlockKind::Vertical,
            }),
            None,
        );
        assert!(!block.is_cacheable());

        let status = ForwardMsg::new(ForwardMsgBody::SessionStatusChanged(SessionStatus {
            script_is_running: true,
        }));
        assert!(!status.is_cacheable());
    }

    #[test]
    fn test_serde_roundtrip_skips_hash() {
        let msg = text_msg("hi");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ForwardMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.content_hash(), msg.content_hash());
    }
}

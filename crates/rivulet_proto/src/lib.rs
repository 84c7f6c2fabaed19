//! Rivulet Wire Data Model
//!
//! This crate defines the records exchanged between the execution engine and
//! its transport collaborator:
//!
//! - **Widget values**: the raw wire form of every widget's current value,
//!   batched as [`WidgetStates`] and merged with [`WidgetStates::coalesce`]
//! - **Deltas**: instructions that create, replace, or append to a UI node at
//!   a [`DeltaPath`] tree coordinate
//! - **Messages**: outgoing [`ForwardMsg`] render/lifecycle instructions and
//!   incoming [`BackMsg`] browser events
//!
//! The exact binary encoding is a transport concern; everything here is
//! serde-serializable so any encoding that round-trips serde works.

pub mod delta;
pub mod msg;
pub mod value;
pub mod widget_states;

pub use delta::{Block, BlockKind, Delta, DeltaPath, Element};
pub use msg::{
    AutoRerun, BackMsg, CachedMsgRef, ForwardMsg, ForwardMsgBody, NewSession, PageConfig,
    ScriptFinishedStatus, SessionEvent, SessionStatus,
};
pub use value::{ValueKind, WidgetValue};
pub use widget_states::{WidgetState, WidgetStates};

/// Stable, hash-derived identity for a widget, used to correlate values
/// across reruns.
pub type WidgetId = String;

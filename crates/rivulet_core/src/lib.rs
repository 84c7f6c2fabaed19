//! Rivulet Core Primitives
//!
//! Session-scoped building blocks for the script execution engine:
//!
//! - **Identity hashing**: stable widget ids derived from declared inputs
//! - **Forward message queue**: ordered, mutation-coalescing outgoing queue
//! - **Forward message cache**: process-wide dedup of large payloads
//! - **Session state**: the widget/state registry with change detection and
//!   callback dispatch
//!
//! Each session owns one queue and one registry; the cache is shared
//! process-wide and handed to sessions explicitly.

pub mod error;
pub mod forward_queue;
pub mod ids;
pub mod msg_cache;
pub mod session_state;

pub use error::{CoreError, Result};
pub use forward_queue::ForwardMsgQueue;
pub use msg_cache::ForwardMsgCache;
pub use session_state::{
    SessionState, WidgetCallback, WidgetDeserializer, WidgetMetadata, WidgetSerializer,
};

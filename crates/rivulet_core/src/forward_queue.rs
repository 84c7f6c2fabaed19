//! Ordered, mutation-coalescing outgoing message queue.
//!
//! One queue per session. The script thread enqueues while a run executes;
//! the session drains with [`ForwardMsgQueue::flush`] when it forwards to
//! the transport, or drops everything with [`ForwardMsgQueue::clear`] when
//! a rerun starts. Mutation of one queue is serialized by the owning
//! session; the queue itself is not a synchronization point.

use crate::error::{CoreError, Result};
use rivulet_proto::{Delta, DeltaPath, ForwardMsg};
use rustc_hash::FxHashMap;

/// Outgoing queue with in-place delta replacement.
#[derive(Default)]
pub struct ForwardMsgQueue {
    messages: Vec<ForwardMsg>,
    /// Position of the replaceable (non-block) delta per path.
    replaceable: FxHashMap<DeltaPath, usize>,
    max_message_size: Option<usize>,
}

impl ForwardMsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue with serialized-size enforcement on enqueue.
    pub fn with_max_message_size(limit: usize) -> Self {
        Self {
            max_message_size: Some(limit),
            ..Self::default()
        }
    }

    /// Append a message, coalescing against pending deltas.
    ///
    /// A `NewElement` delta whose path matches a pending `NewElement`
    /// replaces it at the same queue position, which bounds queue growth
    /// when a value is overwritten repeatedly before ever being sent.
    /// Block-open deltas are never replaced - later deltas may depend on
    /// the container already existing. Append-rows deltas always trail.
    pub fn enqueue(&mut self, msg: ForwardMsg) -> Result<()> {
        if let Some(limit) = self.max_message_size {
            let size = msg.serialized_size();
            if size > limit {
                return Err(CoreError::MessageTooLarge { size, limit });
            }
        }

        let Some(delta_msg) = msg.as_delta() else {
            self.messages.push(msg);
            return Ok(());
        };

        match &delta_msg.delta {
            Delta::AddBlock(_) => {
                // A container at this path supersedes any pending element
                // slot; later elements must land after the block.
                self.replaceable.remove(&delta_msg.path);
                self.messages.push(msg);
            }
            Delta::AddRows { .. } => {
                self.messages.push(msg);
            }
            Delta::NewElement(_) => {
                let path = delta_msg.path.clone();
                if let Some(&slot) = self.replaceable.get(&path) {
                    tracing::trace!(path = %path, slot, "replacing pending delta in place");
                    self.messages[slot] = msg;
                } else {
                    self.replaceable.insert(path, self.messages.len());
                    self.messages.push(msg);
                }
            }
        }
        Ok(())
    }

    /// Atomically drain and return the pending messages in order.
    pub fn flush(&mut self) -> Vec<ForwardMsg> {
        self.replaceable.clear();
        std::mem::take(&mut self.messages)
    }

    /// Drop all pending messages. Called at rerun start so stale deltas
    /// from an interrupted run never reach the client.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.replaceable.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_proto::{Block, BlockKind, Element, ForwardMsgBody, SessionStatus};

    fn element(path: &[u32], body: &str) -> ForwardMsg {
        ForwardMsg::delta(
            DeltaPath::from_indices(path.iter().copied()),
            Delta::NewElement(Element::new("text", serde_json::json!({ "body": body }))),
            None,
        )
    }

    fn block(path: &[u32]) -> ForwardMsg {
        ForwardMsg::delta(
            DeltaPath::from_indices(path.iter().copied()),
            Delta::AddBlock(Block {
                kind: BlockKind::Vertical,
            }),
            None,
        )
    }

    fn add_rows(path: &[u32]) -> ForwardMsg {
        ForwardMsg::delta(
            DeltaPath::from_indices(path.iter().copied()),
            Delta::AddRows {
                rows: serde_json::json!([1, 2, 3]),
            },
            None,
        )
    }

    fn body_text(msg: &ForwardMsg) -> String {
        match &msg.as_delta().unwrap().delta {
            Delta::NewElement(el) => el.body["body"].as_str().unwrap().to_string(),
            other => panic!("not an element: {other:?}"),
        }
    }

    #[test]
    fn test_same_path_element_replaced_in_place() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(element(&[0, 0], "first")).unwrap();
        queue.enqueue(element(&[0, 1], "A")).unwrap();
        queue.enqueue(element(&[0, 1], "B")).unwrap();

        assert_eq!(queue.len(), 2);
        let flushed = queue.flush();
        assert_eq!(body_text(&flushed[0]), "first");
        // Replacement kept the original ordinal position.
        assert_eq!(body_text(&flushed[1]), "B");
    }

    #[test]
    fn test_block_open_is_never_replaced() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(block(&[0])).unwrap();
        queue.enqueue(element(&[0], "inside")).unwrap();

        assert_eq!(queue.len(), 2);
        let flushed = queue.flush();
        assert!(flushed[0].as_delta().unwrap().delta.is_add_block());
        assert_eq!(body_text(&flushed[1]), "inside");
    }

    #[test]
    fn test_element_after_block_becomes_replaceable() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(block(&[0])).unwrap();
        queue.enqueue(element(&[0], "A")).unwrap();
        queue.enqueue(element(&[0], "B")).unwrap();

        assert_eq!(queue.len(), 2);
        let flushed = queue.flush();
        assert_eq!(body_text(&flushed[1]), "B");
    }

    #[test]
    fn test_block_invalidates_earlier_element_slot() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(element(&[0], "old")).unwrap();
        queue.enqueue(block(&[0])).unwrap();
        queue.enqueue(element(&[0], "new")).unwrap();

        // The late element must not replace into the pre-block slot.
        assert_eq!(queue.len(), 3);
        let flushed = queue.flush();
        assert!(flushed[1].as_delta().unwrap().delta.is_add_block());
        assert_eq!(body_text(&flushed[2]), "new");
    }

    #[test]
    fn test_add_rows_trails_without_coalescing() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(element(&[0], "table")).unwrap();
        queue.enqueue(add_rows(&[0])).unwrap();
        queue.enqueue(add_rows(&[0])).unwrap();

        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_flush_drains_and_resets() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(element(&[0], "A")).unwrap();
        assert_eq!(queue.flush().len(), 1);
        assert!(queue.is_empty());

        // Same path enqueued after a flush starts a fresh slot.
        queue.enqueue(element(&[0], "B")).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut queue = ForwardMsgQueue::new();
        queue.enqueue(element(&[0], "A")).unwrap();
        queue
            .enqueue(ForwardMsg::new(ForwardMsgBody::SessionStatusChanged(
                SessionStatus {
                    script_is_running: true,
                },
            )))
            .unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_delta_messages_pass_through_in_order() {
        let mut queue = ForwardMsgQueue::new();
        let status = ForwardMsg::new(ForwardMsgBody::SessionStatusChanged(SessionStatus {
            script_is_running: true,
        }));
        queue.enqueue(status.clone()).unwrap();
        queue.enqueue(status).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let mut queue = ForwardMsgQueue::with_max_message_size(64);
        let big = element(&[0], &"x".repeat(256));
        let err = queue.enqueue(big).unwrap_err();
        assert!(matches!(err, CoreError::MessageTooLarge { .. }));
        assert!(queue.is_empty());
    }
}

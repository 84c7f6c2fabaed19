//! Deltas: UI tree mutations addressed by tree coordinates.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Ordered sequence of child-index coordinates locating a node in the UI
/// tree. The root container is the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeltaPath(SmallVec<[u32; 8]>);

impl DeltaPath {
    /// The root container path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        Self(indices.into_iter().collect())
    }

    /// Path of the `index`-th child of this node.
    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// Path of the parent node, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        let mut indices = self.0.clone();
        indices.pop();
        Some(Self(indices))
    }

    /// True if `self` equals `prefix` or lies beneath it in the tree.
    pub fn starts_with(&self, prefix: &DeltaPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeltaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(root)");
        }
        let mut first = true;
        for idx in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{idx}")?;
            first = false;
        }
        Ok(())
    }
}

/// A leaf element payload. The engine treats the body as opaque; element
/// marshalling shims decide what goes inside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Element type name, e.g. `"text"` or `"slider"`.
    pub element_type: String,
    pub body: serde_json::Value,
}

impl Element {
    pub fn new(element_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            element_type: element_type.into(),
            body,
        }
    }
}

/// Container block kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Vertical,
    Horizontal,
    /// A form groups widget mutations until submitted. Form ids must be
    /// unique within one run.
    Form { form_id: String },
}

/// A block-open delta payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
}

/// One instruction describing a UI node creation, replacement, or append.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    /// Create or replace the element at the target path.
    NewElement(Element),
    /// Open a container at the target path. Never replaced once queued,
    /// since later deltas may already depend on the container existing.
    AddBlock(Block),
    /// Append rows to the data-bearing element at the target path.
    AddRows { rows: serde_json::Value },
}

impl Delta {
    /// True for block-open deltas, which the queue must never replace.
    pub fn is_add_block(&self) -> bool {
        matches!(self, Delta::AddBlock(_))
    }

    pub fn is_add_rows(&self) -> bool {
        matches!(self, Delta::AddRows { .. })
    }
}

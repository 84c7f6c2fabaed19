//! Stable identity hashing
//!
//! Widget ids must be deterministic functions of a widget's declared inputs
//! so that the same declaration maps to the same id on every rerun, while
//! two widgets with different labels or options never collide. All digests
//! use `DefaultHasher`, which hashes with fixed keys and is therefore stable
//! for the lifetime of the process.

use rivulet_proto::{DeltaPath, WidgetId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Compute the stable id for a widget declaration.
///
/// The digest covers the element type, serialized options, and either the
/// explicit user key or the declaration position. A user key pins identity
/// independent of position, so a keyed widget keeps its value when the
/// script moves it; an unkeyed widget is identified by where it appears.
pub fn widget_id(
    element_type: &str,
    options: &serde_json::Value,
    user_key: Option<&str>,
    position: Option<&DeltaPath>,
) -> WidgetId {
    let mut hasher = DefaultHasher::new();
    element_type.hash(&mut hasher);
    options.to_string().hash(&mut hasher);
    match user_key {
        Some(key) => {
            1u8.hash(&mut hasher);
            key.hash(&mut hasher);
        }
        None => {
            0u8.hash(&mut hasher);
            if let Some(path) = position {
                path.indices().hash(&mut hasher);
            }
        }
    }
    format!("{element_type}-{:016x}", hasher.finish())
}

/// Compute a stable id from a prefix and string parts. Used for fragment
/// ids (declaration identity) and other hash-derived names.
pub fn stable_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    format!("{prefix}-{:016x}", hasher.finish())
}

//! Raw widget values in wire form.

use serde::{Deserialize, Serialize};

/// Tag describing the wire type of a widget's value.
///
/// Stored in widget metadata so the registry can apply type-specific rules
/// (trigger pulse reset, trigger-OR coalescing) without inspecting values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// One-shot pulse (button click). Resets to `false` after each run.
    Trigger,
    Bool,
    Int,
    Double,
    Text,
    Bytes,
    /// Arbitrary structured value for composite widgets.
    Json,
}

/// The externally-visible current value for one widget id, in raw wire form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WidgetValue {
    Trigger(bool),
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl WidgetValue {
    /// The wire type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            WidgetValue::Trigger(_) => ValueKind::Trigger,
            WidgetValue::Bool(_) => ValueKind::Bool,
            WidgetValue::Int(_) => ValueKind::Int,
            WidgetValue::Double(_) => ValueKind::Double,
            WidgetValue::Text(_) => ValueKind::Text,
            WidgetValue::Bytes(_) => ValueKind::Bytes,
            WidgetValue::Json(_) => ValueKind::Json,
        }
    }

    /// Trigger payload, if this is a trigger value.
    pub fn as_trigger(&self) -> Option<bool> {
        match self {
            WidgetValue::Trigger(fired) => Some(*fired),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WidgetValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            WidgetValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            WidgetValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WidgetValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Default value for a wire type, used when a widget has never been set.
    pub fn default_for(kind: ValueKind) -> WidgetValue {
        match kind {
            ValueKind::Trigger => WidgetValue::Trigger(false),
            ValueKind::Bool => WidgetValue::Bool(false),
            ValueKind::Int => WidgetValue::Int(0),
            ValueKind::Double => WidgetValue::Double(0.0),
            ValueKind::Text => WidgetValue::Text(String::new()),
            ValueKind::Bytes => WidgetValue::Bytes(Vec::new()),
            ValueKind::Json => WidgetValue::Json(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        assert_eq!(WidgetValue::Trigger(true).kind(), ValueKind::Trigger);
        assert_eq!(WidgetValue::Int(7).kind(), ValueKind::Int);
        assert_eq!(
            WidgetValue::Text("hi".into()).kind(),
            ValueKind::Text
        );
    }

    #[test]
    fn test_default_for_trigger_is_unfired() {
        assert_eq!(
            WidgetValue::default_for(ValueKind::Trigger),
            WidgetValue::Trigger(false)
        );
    }
}

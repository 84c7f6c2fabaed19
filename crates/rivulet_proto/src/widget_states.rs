//! Widget state batches and the coalescing algorithm.
//!
//! A [`WidgetStates`] batch arrives from the transport with each rerun
//! request. When requests pile up while a run is in flight, batches are
//! merged with [`WidgetStates::coalesce`]: trigger values OR together so a
//! click is never lost, every other type takes the newer value.

use crate::value::{ValueKind, WidgetValue};
use crate::WidgetId;
use serde::{Deserialize, Serialize};

/// One widget id paired with its raw wire value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidgetState {
    pub id: WidgetId,
    pub value: WidgetValue,
}

/// An ordered batch of widget states.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetStates {
    states: Vec<WidgetState>,
}

impl WidgetStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the value for a widget id.
    pub fn get(&self, id: &str) -> Option<&WidgetValue> {
        self.states.iter().find(|s| s.id == id).map(|s| &s.value)
    }

    /// Set a widget's value, replacing any existing entry for the same id.
    pub fn set(&mut self, id: impl Into<WidgetId>, value: WidgetValue) {
        let id = id.into();
        if let Some(existing) = self.states.iter_mut().find(|s| s.id == id) {
            existing.value = value;
        } else {
            self.states.push(WidgetState { id, value });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WidgetState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Merge two batches into one.
    ///
    /// Every id present in only one input appears unchanged. Ids present in
    /// both take the new value, except trigger-type ids whose merged value is
    /// `old OR new` - a click recorded in the older request survives being
    /// overwritten by a later request that hasn't observed it.
    ///
    /// The merge is idempotent: coalescing a batch with itself, or re-applying
    /// `new` to an already-merged result, changes nothing.
    pub fn coalesce(old: &WidgetStates, new: &WidgetStates) -> WidgetStates {
        let mut merged = WidgetStates::new();
        for state in &old.states {
            let value = match new.get(&state.id) {
                Some(newer) => merge_value(&state.value, newer),
                None => state.value.clone(),
            };
            merged.set(state.id.clone(), value);
        }
        for state in &new.states {
            if merged.get(&state.id).is_none() {
                merged.set(state.id.clone(), state.value.clone());
            }
        }
        merged
    }
}

fn merge_value(old: &WidgetValue, new: &WidgetValue) -> WidgetValue {
    if old.kind() == ValueKind::Trigger && new.kind() == ValueKind::Trigger {
        let fired = old.as_trigger().unwrap_or(false) || new.as_trigger().unwrap_or(false);
        WidgetValue::Trigger(fired)
    } else {
        new.clone()
    }
}

impl FromIterator<WidgetState> for WidgetStates {
    fn from_iter<I: IntoIterator<Item = WidgetState>>(iter: I) -> Self {
        let mut states = WidgetStates::new();
        for s in iter {
            states.set(s.id, s.value);
        }
        states
    }
}

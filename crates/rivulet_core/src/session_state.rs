//! Widget/state registry ("SessionState")
//!
//! Single source of truth for every widget's current value, previous value,
//! and registered metadata, for one session, across all reruns.
//!
//! Metadata is (re)registered every time the widget-producing call executes
//! during a run; ids not re-registered by the most recent run are pruned by
//! [`SessionState::compact_state`] so widgets that stop rendering stop
//! occupying memory and stop firing callbacks.

use crate::error::{CoreError, Result};
use indexmap::IndexMap;
use rivulet_proto::{ValueKind, WidgetId, WidgetState, WidgetStates, WidgetValue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;

/// Converts a raw wire value (possibly absent) into the widget's canonical
/// value. Handles the default when the widget has never been set.
pub type WidgetDeserializer = Arc<dyn Fn(Option<&WidgetValue>) -> WidgetValue + Send + Sync>;

/// Converts a canonical value back into raw wire form for replay/testing.
pub type WidgetSerializer = Arc<dyn Fn(&WidgetValue) -> WidgetValue + Send + Sync>;

/// Change callback. Arguments from the declaration site are closure
/// captures; panics unwind to the run's top-level error boundary.
pub type WidgetCallback = Arc<dyn Fn() + Send + Sync>;

/// Describes one widget's value contract.
#[derive(Clone)]
pub struct WidgetMetadata {
    pub id: WidgetId,
    pub kind: ValueKind,
    pub deserializer: WidgetDeserializer,
    pub serializer: WidgetSerializer,
    pub callback: Option<WidgetCallback>,
    pub has_user_key: bool,
}

impl WidgetMetadata {
    /// Metadata with passthrough (de)serializers that substitute the wire
    /// type's default when no value is stored.
    pub fn new(id: impl Into<WidgetId>, kind: ValueKind) -> Self {
        Self {
            id: id.into(),
            kind,
            deserializer: Arc::new(move |raw| {
                raw.cloned().unwrap_or_else(|| WidgetValue::default_for(kind))
            }),
            serializer: Arc::new(|value| value.clone()),
            callback: None,
            has_user_key: false,
        }
    }

    pub fn with_deserializer(mut self, deserializer: WidgetDeserializer) -> Self {
        self.deserializer = deserializer;
        self
    }

    pub fn with_serializer(mut self, serializer: WidgetSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_callback<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_user_key(mut self, has_user_key: bool) -> Self {
        self.has_user_key = has_user_key;
        self
    }
}

impl fmt::Debug for WidgetMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetMetadata")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .field("has_user_key", &self.has_user_key)
            .finish()
    }
}

/// Per-session widget registry.
#[derive(Default)]
pub struct SessionState {
    /// Insertion-ordered so callback dispatch is deterministic.
    metadata: IndexMap<WidgetId, WidgetMetadata>,
    values: FxHashMap<WidgetId, WidgetValue>,
    previous: FxHashMap<WidgetId, WidgetValue>,
    /// Ids whose metadata was registered during the current run.
    ids_this_run: FxHashSet<WidgetId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite metadata for a widget id. Implies no value.
    pub fn set_metadata(&mut self, metadata: WidgetMetadata) {
        self.ids_this_run.insert(metadata.id.clone());
        self.metadata.insert(metadata.id.clone(), metadata);
    }

    /// Deserialize and return the widget's current value.
    ///
    /// Fails with [`CoreError::NoSuchWidget`] when no metadata (and thus no
    /// deserializer) is registered for the id.
    pub fn get(&self, id: &str) -> Result<WidgetValue> {
        let metadata = self
            .metadata
            .get(id)
            .ok_or_else(|| CoreError::NoSuchWidget(id.to_string()))?;
        Ok((metadata.deserializer)(self.values.get(id)))
    }

    /// The stored raw value, if any.
    pub fn raw(&self, id: &str) -> Option<&WidgetValue> {
        self.values.get(id)
    }

    /// Ingest an incoming widget state batch, replacing the previous value
    /// for each id present. Batch-level coalescing happens upstream in the
    /// run request queue; by the time a batch reaches here it is canonical.
    pub fn set_from_proto(&mut self, batch: &WidgetStates) {
        for state in batch.iter() {
            if let Some(old) = self.values.get(&state.id) {
                self.previous.insert(state.id.clone(), old.clone());
            }
            self.values.insert(state.id.clone(), state.value.clone());
        }
    }

    /// Force every trigger-type widget's stored value to unfired. Called
    /// once per run after the script has observed pending pulses, so click
    /// semantics never persist into the next run.
    pub fn reset_triggers(&mut self) {
        for metadata in self.metadata.values() {
            if metadata.kind == ValueKind::Trigger {
                self.values
                    .insert(metadata.id.clone(), WidgetValue::Trigger(false));
            }
        }
    }

    /// Callbacks of every widget whose value changed, in metadata
    /// registration order (deterministic within a run).
    ///
    /// Trigger widgets count as changed whenever their current value is
    /// fired, even if the previous value was also fired - trigger callbacks
    /// fire per pulse, not per transition. Returned so callers holding a
    /// lock on the registry can release it before dispatching; callbacks
    /// are free to read widget values back through the registry.
    pub fn due_callbacks(&self) -> Vec<WidgetCallback> {
        let mut due = Vec::new();
        for metadata in self.metadata.values() {
            let Some(callback) = &metadata.callback else {
                continue;
            };
            let Some(current) = self.values.get(&metadata.id) else {
                continue;
            };
            let changed = match metadata.kind {
                ValueKind::Trigger => current.as_trigger() == Some(true),
                _ => self.previous.get(&metadata.id) != Some(current),
            };
            if changed {
                tracing::debug!(widget = %metadata.id, "widget callback due");
                due.push(callback.clone());
            }
        }
        due
    }

    /// Invoke the callback of every widget whose value changed.
    pub fn call_callbacks(&self) {
        for callback in self.due_callbacks() {
            callback();
        }
    }

    /// Widgets that currently have both metadata and a stored value, in
    /// wire form via their registered serializers.
    pub fn as_widget_states(&self) -> WidgetStates {
        self.metadata
            .values()
            .filter_map(|metadata| {
                self.values.get(&metadata.id).map(|value| WidgetState {
                    id: metadata.id.clone(),
                    value: (metadata.serializer)(value),
                })
            })
            .collect()
    }

    /// Begin a run: clear the re-registration bookkeeping that compaction
    /// consumes at the end of the run.
    pub fn begin_run(&mut self) {
        self.ids_this_run.clear();
    }

    /// Prune widget ids whose metadata was not re-registered in the most
    /// recently completed run.
    pub fn compact_state(&mut self) {
        let stale: Vec<WidgetId> = self
            .metadata
            .keys()
            .filter(|id| !self.ids_this_run.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            tracing::debug!(widget = %id, "compacting stale widget");
            self.metadata.shift_remove(id);
            self.values.remove(id);
            self.previous.remove(id);
        }
    }

    pub fn widget_count(&self) -> usize {
        self.metadata.len()
    }
}

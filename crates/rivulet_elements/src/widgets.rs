//! Stateful widgets.
//!
//! Builders follow the same shape: construct with the label, chain options,
//! then `show()` to render and read the current value. Identity comes from
//! the element type, options, and position, unless `key` pins it.

use rivulet_core::{ids, WidgetMetadata};
use rivulet_proto::{Delta, Element, ValueKind, WidgetValue};
use rivulet_runtime::{context, ScriptError, UploadedFile};
use serde_json::json;
use std::sync::Arc;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One-shot button. `show` returns true only on the run that observed the
/// click; the pulse resets when the run ends.
pub struct Button {
    label: String,
    key: Option<String>,
    on_click: Option<Callback>,
}

impl Button {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: None,
            on_click: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn on_click<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_click = Some(Arc::new(callback));
        self
    }

    pub fn show(self) -> Result<bool, ScriptError> {
        let ctx = context::current()?;
        let path = ctx.next_element_path();
        let opts = json!({ "label": self.label });
        let id = ids::widget_id("button", &opts, self.key.as_deref(), Some(&path));

        let mut metadata =
            WidgetMetadata::new(id.clone(), ValueKind::Trigger).with_user_key(self.key.is_some());
        if let Some(callback) = self.on_click {
            metadata.callback = Some(callback);
        }
        let value = ctx.register_widget(metadata)?;

        ctx.enqueue_at(
            path,
            Delta::NewElement(Element::new(
                "button",
                json!({ "label": self.label, "widget_id": id }),
            )),
        )?;
        Ok(value.as_trigger().unwrap_or(false))
    }
}

pub struct Checkbox {
    label: String,
    key: Option<String>,
    default: bool,
    on_change: Option<Callback>,
}

impl Checkbox {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: None,
            default: false,
            on_change: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn on_change<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn show(self) -> Result<bool, ScriptError> {
        let ctx = context::current()?;
        let path = ctx.next_element_path();
        let opts = json!({ "label": self.label, "default": self.default });
        let id = ids::widget_id("checkbox", &opts, self.key.as_deref(), Some(&path));

        let default = self.default;
        let mut metadata = WidgetMetadata::new(id.clone(), ValueKind::Bool)
            .with_user_key(self.key.is_some())
            .with_deserializer(Arc::new(move |raw| {
                raw.cloned().unwrap_or(WidgetValue::Bool(default))
            }));
        if let Some(callback) = self.on_change {
            metadata.callback = Some(callback);
        }
        let value = ctx.register_widget(metadata)?;

        ctx.enqueue_at(
            path,
            Delta::NewElement(Element::new(
                "checkbox",
                json!({ "label": self.label, "default": self.default, "widget_id": id }),
            )),
        )?;
        Ok(value.as_bool().unwrap_or(default))
    }
}

/// Numeric slider over a closed range. Incoming values clamp to the range
/// so a stale client cannot push the state out of bounds.
pub struct Slider {
    label: String,
    min: f64,
    max: f64,
    default: Option<f64>,
    key: Option<String>,
    on_change: Option<Callback>,
}

impl Slider {
    pub fn new(label: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            label: label.into(),
            min,
            max,
            default: None,
            key: None,
            on_change: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }

    pub fn on_change<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn show(self) -> Result<f64, ScriptError> {
        let ctx = context::current()?;
        let path = ctx.next_element_path();
        let default = self.default.unwrap_or(self.min).clamp(self.min, self.max);
        let opts = json!({
            "label": self.label,
            "min": self.min,
            "max": self.max,
            "default": default,
        });
        let id = ids::widget_id("slider", &opts, self.key.as_deref(), Some(&path));

        let (min, max) = (self.min, self.max);
        let mut metadata = WidgetMetadata::new(id.clone(), ValueKind::Double)
            .with_user_key(self.key.is_some())
            .with_deserializer(Arc::new(move |raw| {
                let value = raw.and_then(WidgetValue::as_double).unwrap_or(default);
                WidgetValue::Double(value.clamp(min, max))
            }));
        if let Some(callback) = self.on_change {
            metadata.callback = Some(callback);
        }
        let value = ctx.register_widget(metadata)?;

        let mut body = opts;
        body["widget_id"] = json!(id);
        ctx.enqueue_at(path, Delta::NewElement(Element::new("slider", body)))?;
        Ok(value.as_double().unwrap_or(default))
    }
}

pub struct TextInput {
    label: String,
    default: String,
    key: Option<String>,
    on_change: Option<Callback>,
}

impl TextInput {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            default: String::new(),
            key: None,
            on_change: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn on_change<F: Fn() + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn show(self) -> Result<String, ScriptError> {
        let ctx = context::current()?;
        let path = ctx.next_element_path();
        let opts = json!({ "label": self.label, "default": self.default });
        let id = ids::widget_id("text_input", &opts, self.key.as_deref(), Some(&path));

        let default = self.default.clone();
        let mut metadata = WidgetMetadata::new(id.clone(), ValueKind::Text)
            .with_user_key(self.key.is_some())
            .with_deserializer(Arc::new(move |raw| {
                raw.cloned().unwrap_or(WidgetValue::Text(default.clone()))
            }));
        if let Some(callback) = self.on_change {
            metadata.callback = Some(callback);
        }
        let value = ctx.register_widget(metadata)?;

        ctx.enqueue_at(
            path,
            Delta::NewElement(Element::new(
                "text_input",
                json!({ "label": self.label, "default": self.default, "widget_id": id }),
            )),
        )?;
        Ok(value
            .as_text()
            .map(str::to_string)
            .unwrap_or(self.default))
    }
}

/// File picker; `show` returns the files the client has uploaded for it.
pub struct FileUploader {
    label: String,
    key: Option<String>,
}

impl FileUploader {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn show(self) -> Result<Vec<UploadedFile>, ScriptError> {
        let ctx = context::current()?;
        let path = ctx.next_element_path();
        let opts = json!({ "label": self.label });
        let id = ids::widget_id("file_uploader", &opts, self.key.as_deref(), Some(&path));

        ctx.register_widget(
            WidgetMetadata::new(id.clone(), ValueKind::Json).with_user_key(self.key.is_some()),
        )?;
        ctx.enqueue_at(
            path,
            Delta::NewElement(Element::new(
                "file_uploader",
                json!({ "label": self.label, "widget_id": id }),
            )),
        )?;
        Ok(ctx.uploads().get_files(ctx.session_id(), &id))
    }
}

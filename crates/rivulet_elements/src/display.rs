//! Output-only elements: no widget state, just deltas.

use rivulet_proto::{Delta, DeltaPath, Element, ForwardMsg, ForwardMsgBody, PageConfig};
use rivulet_runtime::{context, ScriptError};
use serde_json::json;

/// Put a block of text at the next coordinate.
pub fn text(body: impl Into<String>) -> Result<(), ScriptError> {
    let ctx = context::current()?;
    ctx.enqueue_at(
        ctx.next_element_path(),
        Delta::NewElement(Element::new("text", json!({ "body": body.into() }))),
    )
}

/// A rendered table that can grow in place: later runs (or fragment
/// replays) append through the handle without resending existing rows.
pub struct TableHandle {
    path: DeltaPath,
}

/// Render a table and return a handle for appending rows.
pub fn table(columns: &[&str], rows: serde_json::Value) -> Result<TableHandle, ScriptError> {
    let ctx = context::current()?;
    let path = ctx.next_element_path();
    ctx.enqueue_at(
        path.clone(),
        Delta::NewElement(Element::new(
            "table",
            json!({ "columns": columns, "rows": rows }),
        )),
    )?;
    Ok(TableHandle { path })
}

impl TableHandle {
    /// Append rows to the already-rendered table.
    pub fn add_rows(&self, rows: serde_json::Value) -> Result<(), ScriptError> {
        let ctx = context::current()?;
        ctx.enqueue_at(self.path.clone(), Delta::AddRows { rows })
    }
}

/// Set the page title and layout. Must be the first call of the run.
pub fn page_config(title: impl Into<String>, wide_layout: bool) -> Result<(), ScriptError> {
    let ctx = context::current()?;
    ctx.enqueue_msg(ForwardMsg::new(ForwardMsgBody::PageConfigChanged(
        PageConfig {
            title: Some(title.into()),
            wide_layout,
        },
    )))
}

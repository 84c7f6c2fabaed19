//! Uploaded file storage, keyed by (session, widget).

use rivulet_proto::WidgetId;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One file received from the client.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub id: u64,
    pub name: String,
    pub data: Vec<u8>,
}

/// Process-wide store of uploaded files. A new upload batch for a widget
/// replaces the previous one, matching the replace-don't-merge semantics
/// of widget values.
#[derive(Default)]
pub struct UploadedFileManager {
    files: Mutex<FxHashMap<(String, WidgetId), Vec<UploadedFile>>>,
    next_id: AtomicU64,
}

impl UploadedFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a batch of files for a widget, assigning ids. Returns the
    /// assigned ids in input order.
    pub fn add_files(
        &self,
        session_id: &str,
        widget_id: &WidgetId,
        files: Vec<(String, Vec<u8>)>,
    ) -> Vec<u64> {
        let files: Vec<UploadedFile> = files
            .into_iter()
            .map(|(name, data)| UploadedFile {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                name,
                data,
            })
            .collect();
        let ids = files.iter().map(|f| f.id).collect();
        self.files
            .lock()
            .unwrap()
            .insert((session_id.to_string(), widget_id.clone()), files);
        ids
    }

    pub fn get_files(&self, session_id: &str, widget_id: &WidgetId) -> Vec<UploadedFile> {
        self.files
            .lock()
            .unwrap()
            .get(&(session_id.to_string(), widget_id.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove_files(&self, session_id: &str, widget_id: &WidgetId) {
        self.files
            .lock()
            .unwrap()
            .remove(&(session_id.to_string(), widget_id.clone()));
    }

    /// Drop everything a session uploaded. Called when the session closes.
    pub fn remove_session_files(&self, session_id: &str) {
        self.files
            .lock()
            .unwrap()
            .retain(|(owner, _), _| owner != session_id);
    }
}

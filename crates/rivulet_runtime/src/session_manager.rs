//! Owns every live session for one app.

use crate::config::RuntimeConfig;
use crate::pages::PagesManager;
use crate::script::ScriptSource;
use crate::session::Session;
use crate::uploads::UploadedFileManager;
use rivulet_core::{ids, ForwardMsgCache};
use rivulet_proto::{BackMsg, ForwardMsg};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

slotmap::new_key_type! {
    pub struct SessionKey;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no such session: {0}")]
    NoSuchSession(String),
}

/// Creates, routes to, and retires sessions, and owns the process-wide
/// stores they share: the message cache, the upload store, and the page
/// registry.
pub struct SessionManager {
    config: RuntimeConfig,
    source: Arc<dyn ScriptSource>,
    sessions: SlotMap<SessionKey, Session>,
    by_id: FxHashMap<String, SessionKey>,
    cache: Arc<Mutex<ForwardMsgCache>>,
    uploads: Arc<UploadedFileManager>,
    pages: Arc<PagesManager>,
    session_serial: u64,
}

impl SessionManager {
    pub fn new(source: Arc<dyn ScriptSource>, config: RuntimeConfig) -> Self {
        let cache = Arc::new(Mutex::new(ForwardMsgCache::new(
            config.min_cached_message_size,
            config.max_cached_message_age,
        )));
        let pages = Arc::new(PagesManager::new(
            source.main_path().display().to_string(),
        ));
        Self {
            config,
            source,
            sessions: SlotMap::with_key(),
            by_id: FxHashMap::default(),
            cache,
            uploads: Arc::new(UploadedFileManager::new()),
            pages,
            session_serial: 0,
        }
    }

    pub fn pages(&self) -> &Arc<PagesManager> {
        &self.pages
    }

    pub fn uploads(&self) -> &Arc<UploadedFileManager> {
        &self.uploads
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Create a session for a new browser connection; returns its id.
    pub fn create_session(&mut self, query_string: String) -> String {
        self.session_serial += 1;
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = ids::stable_id(
            "session",
            &[&self.session_serial.to_string(), &nanos.to_string()],
        );

        let session = Session::new(
            id.clone(),
            self.source.clone(),
            &self.config,
            self.cache.clone(),
            self.uploads.clone(),
            self.pages.clone(),
            query_string,
        );
        let key = self.sessions.insert(session);
        self.by_id.insert(id.clone(), key);
        tracing::info!(session = %id, "session created");
        id
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.by_id.get(id).and_then(|key| self.sessions.get(*key))
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.by_id
            .get(id)
            .and_then(|key| self.sessions.get_mut(*key))
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Session, SessionError> {
        self.by_id
            .get(id)
            .and_then(|key| self.sessions.get_mut(*key))
            .ok_or_else(|| SessionError::NoSuchSession(id.to_string()))
    }

    pub fn handle_backmsg(&mut self, id: &str, msg: BackMsg) -> Result<(), SessionError> {
        self.require_mut(id)?.handle_backmsg(msg);
        Ok(())
    }

    pub fn flush(&mut self, id: &str) -> Result<Vec<ForwardMsg>, SessionError> {
        Ok(self.require_mut(id)?.flush())
    }

    pub fn disconnect(&mut self, id: &str) -> Result<(), SessionError> {
        self.require_mut(id)?.disconnect();
        Ok(())
    }

    pub fn reconnect(&mut self, id: &str) -> Result<(), SessionError> {
        self.require_mut(id)?.reconnect();
        Ok(())
    }

    /// Stop and remove a session.
    pub fn close_session(&mut self, id: &str) -> Result<(), SessionError> {
        let key = self
            .by_id
            .remove(id)
            .ok_or_else(|| SessionError::NoSuchSession(id.to_string()))?;
        if let Some(mut session) = self.sessions.remove(key) {
            session.shutdown();
        }
        Ok(())
    }

    /// Retire sessions that have been disconnected longer than the TTL.
    /// Returns the ids of the sessions evicted.
    pub fn evict_idle(&mut self) -> Vec<String> {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| !s.is_connected() && s.idle_for() >= ttl)
            .map(|s| s.id().to_string())
            .collect();
        for id in &expired {
            tracing::info!(session = %id, "evicting idle session");
            let _ = self.close_session(id);
        }
        expired
    }

    /// Fan a script-changed-on-disk notification out to every session.
    pub fn handle_file_changed(&mut self) {
        for session in self.sessions.values_mut() {
            session.handle_file_changed();
        }
    }

    /// Stop every session. Called at server shutdown.
    pub fn shutdown(&mut self) {
        let ids: Vec<String> = self.by_id.keys().cloned().collect();
        for id in ids {
            let _ = self.close_session(&id);
        }
    }
}

//! One browser connection: script thread, queue, state, and event plumbing.

use crate::config::RuntimeConfig;
use crate::context::{ContextParts, ScriptRunContext};
use crate::fragment::FragmentStorage;
use crate::pages::PagesManager;
use crate::run_requests::ScriptRequests;
use crate::runner::{RunnerEvent, RunnerParts, ScriptRunner};
use crate::script::{RerunData, ScriptSource};
use crate::uploads::UploadedFileManager;
use rivulet_core::{ForwardMsgCache, ForwardMsgQueue, SessionState};
use rivulet_proto::{BackMsg, ForwardMsg, ForwardMsgBody, SessionEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// A single app session. Owns the per-session halves of the engine and
/// shares the process-wide cache, upload store, and page registry.
pub struct Session {
    id: String,
    run_on_save: bool,
    ctx: ScriptRunContext,
    runner: ScriptRunner,
    queue: Arc<Mutex<ForwardMsgQueue>>,
    cache: Arc<Mutex<ForwardMsgCache>>,
    events: UnboundedReceiver<RunnerEvent>,
    /// Completed script runs, used as the cache's age clock.
    script_run_count: u64,
    last_active: Instant,
    connected: bool,
}

impl Session {
    pub fn new(
        id: String,
        source: Arc<dyn ScriptSource>,
        config: &RuntimeConfig,
        cache: Arc<Mutex<ForwardMsgCache>>,
        uploads: Arc<UploadedFileManager>,
        pages: Arc<PagesManager>,
        query_string: String,
    ) -> Self {
        let queue = Arc::new(Mutex::new(match config.max_message_size {
            Some(limit) => ForwardMsgQueue::with_max_message_size(limit),
            None => ForwardMsgQueue::new(),
        }));
        let enqueue_queue = queue.clone();
        let requests = Arc::new(ScriptRequests::new());

        let ctx = ScriptRunContext::new(ContextParts {
            session_id: id.clone(),
            main_script_path: source.main_path().to_path_buf(),
            query_string,
            enqueue: Arc::new(move |msg| enqueue_queue.lock().unwrap().enqueue(msg)),
            session_state: Arc::new(Mutex::new(SessionState::new())),
            fragments: Arc::new(Mutex::new(FragmentStorage::new())),
            uploads,
            pages,
            requests,
            interrupt_on_yield: config.interrupt_on_yield,
        });

        let (events_tx, events) = unbounded_channel();
        let runner = ScriptRunner::new(RunnerParts {
            source,
            ctx: ctx.clone(),
            queue: queue.clone(),
            events: events_tx,
        });

        Self {
            id,
            run_on_save: config.run_on_save,
            ctx,
            runner,
            queue,
            cache,
            events,
            script_run_count: 0,
            last_active: Instant::now(),
            connected: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ctx(&self) -> &ScriptRunContext {
        &self.ctx
    }

    pub fn runner(&self) -> &ScriptRunner {
        &self.runner
    }

    pub fn script_run_count(&self) -> u64 {
        self.script_run_count
    }

    pub fn request_rerun(&mut self, data: RerunData) {
        self.touch();
        self.runner.request_rerun(data);
    }

    pub fn request_stop(&mut self) {
        self.touch();
        self.runner.request_stop();
    }

    /// Pause or resume the script thread at its next checkpoint.
    pub fn set_paused(&self, paused: bool) {
        self.ctx.set_paused(paused);
    }

    pub fn handle_backmsg(&mut self, msg: BackMsg) {
        match msg {
            BackMsg::Rerun {
                widget_states,
                fragment_ids,
                page_hash,
            } => self.request_rerun(RerunData {
                widget_states,
                fragment_ids,
                page_hash,
                is_auto_rerun: false,
            }),
            BackMsg::StopScript => self.request_stop(),
        }
    }

    /// The script changed on disk. Either rerun with the current widget
    /// values or tell the client so it can offer a manual rerun.
    pub fn handle_file_changed(&mut self) {
        if self.run_on_save {
            let states = self.ctx.session_state().lock().unwrap().as_widget_states();
            self.request_rerun(RerunData::with_widget_states(states));
        } else {
            let msg = ForwardMsg::new(ForwardMsgBody::SessionEvent(
                SessionEvent::ScriptChangedOnDisk,
            ));
            if let Err(err) = self.queue.lock().unwrap().enqueue(msg) {
                tracing::error!(session = %self.id, error = %err, "failed to queue change event");
            }
        }
    }

    /// Collect pending runner events, advancing the run counter and
    /// expiring stale cache references as runs complete.
    pub fn drain_events(&mut self) -> Vec<RunnerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if matches!(
                event,
                RunnerEvent::ScriptStoppedWithSuccess
                    | RunnerEvent::ScriptStoppedForRerun
                    | RunnerEvent::FragmentStoppedWithSuccess
            ) {
                self.script_run_count += 1;
                self.cache
                    .lock()
                    .unwrap()
                    .remove_expired(&self.id, self.script_run_count);
            }
            out.push(event);
        }
        out
    }

    /// Take everything queued for the client, deduplicating large payloads
    /// through the shared cache.
    pub fn flush(&mut self) -> Vec<ForwardMsg> {
        self.drain_events();
        self.touch();
        let msgs = self.queue.lock().unwrap().flush();
        let mut cache = self.cache.lock().unwrap();
        msgs.into_iter()
            .map(|msg| cache.process(&self.id, self.script_run_count, msg))
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The browser went away; the session lingers for the reconnect TTL.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.last_active = Instant::now();
    }

    pub fn reconnect(&mut self) {
        self.connected = true;
        self.touch();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Stop the script thread and release everything the session holds in
    /// the shared stores.
    pub fn shutdown(&mut self) {
        self.runner.request_stop();
        self.runner.join();
        self.drain_events();
        self.cache.lock().unwrap().remove_session(&self.id);
        self.ctx.uploads().remove_session_files(&self.id);
        tracing::info!(session = %self.id, "session shut down");
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerState;
    use crate::script::{ClosureScript, ScriptError};
    use rivulet_proto::{Delta, Element, WidgetStates, WidgetValue};

    fn emit_text(body: &str) -> Result<(), ScriptError> {
        let ctx = crate::context::current()?;
        ctx.enqueue_at(
            ctx.next_element_path(),
            Delta::NewElement(Element::new("text", serde_json::json!({ "body": body }))),
        )
    }

    fn session_with(source: Arc<dyn ScriptSource>, config: RuntimeConfig) -> Session {
        Session::new(
            "s1".into(),
            source,
            &config,
            Arc::new(Mutex::new(ForwardMsgCache::new(
                config.min_cached_message_size,
                config.max_cached_message_age,
            ))),
            Arc::new(UploadedFileManager::new()),
            Arc::new(PagesManager::new("app.rs")),
            String::new(),
        )
    }

    fn wait_stopped(session: &Session) {
        for _ in 0..500 {
            if session.runner().state() == RunnerState::Stopped {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("script thread did not stop");
    }

    #[test]
    fn test_backmsg_rerun_delivers_widget_values() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_in_script = observed.clone();
        let mut session = session_with(
            Arc::new(ClosureScript::new("app.rs", move || {
                let ctx = crate::context::current()?;
                let value = ctx.register_widget(rivulet_core::WidgetMetadata::new(
                    "n",
                    rivulet_proto::ValueKind::Int,
                ))?;
                observed_in_script.lock().unwrap().push(value);
                emit_text("x")
            })),
            RuntimeConfig::default(),
        );

        let mut states = WidgetStates::new();
        states.set("n", WidgetValue::Int(42));
        session.handle_backmsg(BackMsg::Rerun {
            widget_states: Some(states),
            fragment_ids: vec![],
            page_hash: None,
        });
        wait_stopped(&session);

        assert_eq!(*observed.lock().unwrap(), vec![WidgetValue::Int(42)]);
        assert!(!session.flush().is_empty());
        assert_eq!(session.script_run_count(), 1);
    }

    #[test]
    fn test_flush_dedups_large_payloads() {
        let payload = "y".repeat(4096);
        let mut session = session_with(
            Arc::new(ClosureScript::new("app.rs", move || emit_text(&payload))),
            RuntimeConfig {
                min_cached_message_size: 256,
                ..RuntimeConfig::default()
            },
        );

        session.request_rerun(RerunData::full());
        wait_stopped(&session);
        let first = session.flush();
        assert!(first
            .iter()
            .all(|m| !matches!(m.body, ForwardMsgBody::Ref(_))));

        session.request_rerun(RerunData::full());
        wait_stopped(&session);
        let second = session.flush();
        assert!(second
            .iter()
            .any(|m| matches!(m.body, ForwardMsgBody::Ref(_))));
    }

    #[test]
    fn test_file_change_notifies_when_run_on_save_off() {
        let mut session = session_with(
            Arc::new(ClosureScript::new("app.rs", || emit_text("x"))),
            RuntimeConfig::default(),
        );
        session.handle_file_changed();
        let msgs = session.flush();
        assert!(matches!(
            msgs[0].body,
            ForwardMsgBody::SessionEvent(SessionEvent::ScriptChangedOnDisk)
        ));
    }

    #[test]
    fn test_file_change_reruns_when_run_on_save_on() {
        let mut session = session_with(
            Arc::new(ClosureScript::new("app.rs", || emit_text("x"))),
            RuntimeConfig {
                run_on_save: true,
                ..RuntimeConfig::default()
            },
        );
        session.handle_file_changed();
        wait_stopped(&session);
        // The run counter only advances when the session collects the
        // runner's stop event.
        session.drain_events();
        assert_eq!(session.script_run_count(), 1);
    }

    #[test]
    fn test_disconnect_reconnect_tracks_idle() {
        let mut session = session_with(
            Arc::new(ClosureScript::new("app.rs", || Ok(()))),
            RuntimeConfig::default(),
        );
        assert!(session.is_connected());
        session.disconnect();
        assert!(!session.is_connected());
        session.reconnect();
        assert!(session.is_connected());
        assert!(session.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_releases_shared_state() {
        let cache = Arc::new(Mutex::new(ForwardMsgCache::new(64, 2)));
        let uploads = Arc::new(UploadedFileManager::new());
        let payload = "z".repeat(4096);
        let mut session = Session::new(
            "s1".into(),
            Arc::new(ClosureScript::new("app.rs", move || emit_text(&payload))),
            &RuntimeConfig::default(),
            cache.clone(),
            uploads.clone(),
            Arc::new(PagesManager::new("app.rs")),
            String::new(),
        );
        uploads.add_files("s1", &"u".to_string(), vec![("a.csv".into(), vec![1])]);

        session.request_rerun(RerunData::full());
        wait_stopped(&session);
        session.flush();
        assert!(!cache.lock().unwrap().is_empty());

        session.shutdown();
        assert!(cache.lock().unwrap().is_empty());
        assert!(uploads.get_files("s1", &"u".to_string()).is_empty());
    }
}

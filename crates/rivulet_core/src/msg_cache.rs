//! Process-wide forward message cache.
//!
//! Large payloads (repeated dataframes, images re-emitted on every rerun)
//! are deduplicated by content hash: the first send within the age window
//! carries the full payload, later sends carry a [`CachedMsgRef`]. Entries
//! are shared across sessions - a payload identical in two sessions is
//! stored once - while each session's reference age is tracked
//! independently in script-run counts, not wall time.

use rivulet_proto::{CachedMsgRef, ForwardMsg, ForwardMsgBody};
use rustc_hash::FxHashMap;

struct CacheEntry {
    msg: ForwardMsg,
    /// Run count at which each session last sent this payload.
    session_run_counts: FxHashMap<String, u64>,
}

/// Content-hash keyed cache of large outgoing payloads.
pub struct ForwardMsgCache {
    entries: FxHashMap<String, CacheEntry>,
    /// Minimum serialized size for a message to be worth caching.
    min_cache_size: usize,
    /// Maximum reference age, in completed script runs.
    max_age_runs: u64,
}

impl ForwardMsgCache {
    pub fn new(min_cache_size: usize, max_age_runs: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            min_cache_size,
            max_age_runs,
        }
    }

    /// Run an outgoing message through the cache, returning what to send.
    ///
    /// If this session was sent an identical payload within the age window,
    /// the full message is replaced by a reference carrying its hash and
    /// size; otherwise the full payload goes out and the hash is recorded
    /// against this session at the current run count.
    pub fn process(&mut self, session_id: &str, run_count: u64, msg: ForwardMsg) -> ForwardMsg {
        if !msg.is_cacheable() || msg.serialized_size() < self.min_cache_size {
            return msg;
        }

        let hash = msg.content_hash().to_string();
        let size = msg.serialized_size() as u64;
        let entry = self.entries.entry(hash.clone()).or_insert_with(|| CacheEntry {
            msg: msg.clone(),
            session_run_counts: FxHashMap::default(),
        });

        let fresh = entry
            .session_run_counts
            .get(session_id)
            .is_some_and(|&seen| run_count.saturating_sub(seen) <= self.max_age_runs);

        entry
            .session_run_counts
            .insert(session_id.to_string(), run_count);

        if fresh {
            tracing::debug!(%hash, session = session_id, "cache hit, sending reference");
            ForwardMsg::new(ForwardMsgBody::Ref(CachedMsgRef { hash, size }))
        } else {
            msg
        }
    }

    /// Retrieve a cached payload by hash, for transports that let the
    /// client fetch missing payloads out of band.
    pub fn get(&self, hash: &str) -> Option<&ForwardMsg> {
        self.entries.get(hash).map(|e| &e.msg)
    }

    /// Drop this session's references whose age exceeds the window, and
    /// any entries left with no referencing session. Called after each
    /// completed run.
    pub fn remove_expired(&mut self, session_id: &str, current_run_count: u64) {
        let max_age = self.max_age_runs;
        self.entries.retain(|hash, entry| {
            if let Some(&seen) = entry.session_run_counts.get(session_id) {
                if current_run_count.saturating_sub(seen) > max_age {
                    tracing::debug!(%hash, session = session_id, "expiring cache reference");
                    entry.session_run_counts.remove(session_id);
                }
            }
            !entry.session_run_counts.is_empty()
        });
    }

    /// Drop every reference a session holds. Called when a session closes.
    pub fn remove_session(&mut self, session_id: &str) {
        self.entries.retain(|_, entry| {
            entry.session_run_counts.remove(session_id);
            !entry.session_run_counts.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_proto::{Delta, DeltaPath, Element};

    fn big_msg(marker: &str) -> ForwardMsg {
        ForwardMsg::delta(
            DeltaPath::from_indices([0]),
            Delta::NewElement(Element::new(
                "dataframe",
                serde_json::json!({ "marker": marker, "pad": "x".repeat(512) }),
            )),
            None,
        )
    }

    fn cache() -> ForwardMsgCache {
        ForwardMsgCache::new(128, 2)
    }

    fn is_ref(msg: &ForwardMsg) -> bool {
        matches!(msg.body, ForwardMsgBody::Ref(_))
    }

    #[test]
    fn test_full_then_reference() {
        let mut cache = cache();
        let first = cache.process("s1", 0, big_msg("a"));
        assert!(!is_ref(&first));

        let second = cache.process("s1", 1, big_msg("a"));
        assert!(is_ref(&second));
        match &second.body {
            ForwardMsgBody::Ref(r) => assert_eq!(r.hash, big_msg("a").content_hash()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_small_messages_bypass_cache() {
        let mut cache = ForwardMsgCache::new(100_000, 2);
        let first = cache.process("s1", 0, big_msg("a"));
        let second = cache.process("s1", 1, big_msg("a"));
        assert!(!is_ref(&first));
        assert!(!is_ref(&second));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_reference_resends_full_payload() {
        let mut cache = cache();
        assert!(!is_ref(&cache.process("s1", 0, big_msg("a"))));

        // Past the age window without being sent again.
        let resent = cache.process("s1", 5, big_msg("a"));
        assert!(!is_ref(&resent));
    }

    #[test]
    fn test_remove_expired_evicts_unreferenced_entries() {
        let mut cache = cache();
        cache.process("s1", 0, big_msg("a"));
        assert_eq!(cache.len(), 1);

        cache.remove_expired("s1", 10);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sessions_share_one_entry_with_independent_ages() {
        let mut cache = cache();
        cache.process("s1", 0, big_msg("a"));
        assert_eq!(cache.len(), 1);

        // A different session at its own run count gets the full payload
        // first, then references, without a second stored copy.
        assert!(!is_ref(&cache.process("s2", 7, big_msg("a"))));
        assert_eq!(cache.len(), 1);
        assert!(is_ref(&cache.process("s2", 8, big_msg("a"))));

        // Expiring s1 keeps the entry alive for s2.
        cache.remove_expired("s1", 10);
        assert_eq!(cache.len(), 1);
        cache.remove_session("s2");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reference_refreshes_age_baseline() {
        let mut cache = cache();
        cache.process("s1", 0, big_msg("a"));
        assert!(is_ref(&cache.process("s1", 2, big_msg("a"))));
        // Run 2 refreshed the baseline, so run 4 is still within max_age=2.
        assert!(is_ref(&cache.process("s1", 4, big_msg("a"))));
    }

    #[test]
    fn test_get_by_hash() {
        let mut cache = cache();
        let msg = big_msg("a");
        let hash = msg.content_hash().to_string();
        cache.process("s1", 0, msg.clone());
        assert_eq!(cache.get(&hash), Some(&msg));
        assert!(cache.get("no-such-hash").is_none());
    }
}

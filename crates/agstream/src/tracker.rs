//! Tool call identity correlation and timing.
//!
//! The model pipeline assigns its own (internal) ids to tool calls, and those
//! ids may be missing entirely. Clients only ever see external ids minted
//! here. One tracker is shared by every run of a conversation, so all
//! operations are safe under concurrent use from many runs and tool calls.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// A tool call whose start has been observed but not its end.
#[derive(Debug, Clone)]
struct ActiveToolCall {
    tool_name: String,
    started_at: Instant,
}

/// Maps internal tool call ids to external ids and times in-flight calls.
///
/// Mappings live until [`ToolCallTracker::reset`]; scope a tracker to a
/// conversation rather than to the process so the table stays bounded.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    /// Internal id -> external id
    ids: DashMap<String, String>,

    /// Tracking key (external id) -> timing entry
    active: DashMap<String, ActiveToolCall>,
}

fn new_external_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Empty ids carry no correlation key.
fn present(internal_id: Option<&str>) -> Option<&str> {
    internal_id.filter(|id| !id.is_empty())
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an internal id, minting the external id on first use.
    ///
    /// Concurrent callers racing on the same absent id all observe the id
    /// inserted by the winner. A missing or empty internal id yields a fresh
    /// id on every call.
    pub fn get_or_create_tool_call_id(&self, internal_id: Option<&str>) -> String {
        let Some(internal_id) = present(internal_id) else {
            return new_external_id();
        };

        self.ids
            .entry(internal_id.to_string())
            .or_insert_with(new_external_id)
            .value()
            .clone()
    }

    /// Read-only resolution of an internal id.
    ///
    /// Unmapped ids are returned unchanged, i.e. treated as already external.
    /// A missing or empty internal id yields a fresh id, since there is
    /// nothing to look up.
    pub fn get_tool_call_id(&self, internal_id: Option<&str>) -> String {
        let Some(internal_id) = present(internal_id) else {
            return new_external_id();
        };

        match self.ids.get(internal_id) {
            Some(external) => external.value().clone(),
            None => {
                debug!(internal_id, "no tool call mapping, using id as external");
                internal_id.to_string()
            }
        }
    }

    /// Start timing a tool call. A repeated start for the same key restarts the timer.
    pub fn start_tool_call(&self, key: &str, tool_name: &str) {
        let previous = self.active.insert(
            key.to_string(),
            ActiveToolCall {
                tool_name: tool_name.to_string(),
                started_at: Instant::now(),
            },
        );
        if previous.is_some() {
            debug!(tool_call_id = key, tool_name, "tool call restarted");
        }
    }

    /// Stop timing a tool call and return how long it ran.
    ///
    /// Returns `Duration::ZERO` when the call is unknown or was already
    /// ended; callers must read zero as "uncorrelated", not "instant".
    pub fn end_tool_call(&self, key: &str) -> Duration {
        match self.active.remove(key) {
            Some((_, call)) => call.started_at.elapsed(),
            None => {
                warn!(tool_call_id = key, "tool call ended without matching start");
                Duration::ZERO
            }
        }
    }

    /// Stop timing a tool call that will never end (its run was torn down).
    ///
    /// Returns whether an entry was removed.
    pub fn discard_tool_call(&self, key: &str) -> bool {
        self.active.remove(key).is_some()
    }

    /// Name of an in-flight tool call.
    pub fn tool_name(&self, key: &str) -> Option<String> {
        self.active.get(key).map(|call| call.tool_name.clone())
    }

    /// Whether a tool call has started and not yet ended.
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    /// Number of internal ids with a stable external id.
    pub fn mapping_count(&self) -> usize {
        self.ids.len()
    }

    /// Number of tool calls currently being timed.
    pub fn active_call_count(&self) -> usize {
        self.active.len()
    }

    /// Drop all mappings and timing entries.
    pub fn reset(&self) {
        self.ids.clear();
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_stable_mapping() {
        let tracker = ToolCallTracker::new();
        let first = tracker.get_or_create_tool_call_id(Some("abc"));
        let second = tracker.get_or_create_tool_call_id(Some("abc"));

        assert_eq!(first, second);
        assert!(first.starts_with("call_"));
        assert_ne!(first, "abc");
        assert_eq!(tracker.get_tool_call_id(Some("abc")), first);
        assert_eq!(tracker.mapping_count(), 1);
    }

    #[test]
    fn test_empty_id_is_never_memoized() {
        let tracker = ToolCallTracker::new();
        let a = tracker.get_or_create_tool_call_id(Some(""));
        let b = tracker.get_or_create_tool_call_id(Some(""));
        let c = tracker.get_or_create_tool_call_id(None);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(tracker.mapping_count(), 0);
    }

    #[test]
    fn test_distinct_internal_ids() {
        let tracker = ToolCallTracker::new();
        let a = tracker.get_or_create_tool_call_id(Some("a"));
        let b = tracker.get_or_create_tool_call_id(Some("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_read_path_falls_back_to_internal_id() {
        // Asymmetric with the write path: an unknown id is assumed to be
        // external already instead of being reported as a missing call.
        let tracker = ToolCallTracker::new();
        assert_eq!(tracker.get_tool_call_id(Some("toolu_01")), "toolu_01");
        assert_eq!(tracker.mapping_count(), 0);
    }

    #[test]
    fn test_read_path_mints_for_absent_id() {
        let tracker = ToolCallTracker::new();
        let a = tracker.get_tool_call_id(None);
        let b = tracker.get_tool_call_id(Some(""));
        assert!(a.starts_with("call_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_timing() {
        let tracker = ToolCallTracker::new();
        tracker.start_tool_call("call_1", "search");
        assert!(tracker.is_active("call_1"));
        assert_eq!(tracker.tool_name("call_1").as_deref(), Some("search"));

        std::thread::sleep(Duration::from_millis(20));
        let elapsed = tracker.end_tool_call("call_1");

        assert!(elapsed >= Duration::from_millis(20));
        assert!(!tracker.is_active("call_1"));
        assert_eq!(tracker.active_call_count(), 0);
    }

    #[test]
    fn test_end_unknown_or_twice_is_zero() {
        let tracker = ToolCallTracker::new();
        assert_eq!(tracker.end_tool_call("never-started"), Duration::ZERO);

        tracker.start_tool_call("call_1", "search");
        std::thread::sleep(Duration::from_millis(2));
        assert!(tracker.end_tool_call("call_1") > Duration::ZERO);
        assert_eq!(tracker.end_tool_call("call_1"), Duration::ZERO);
    }

    #[test]
    fn test_restart_resets_timer() {
        let tracker = ToolCallTracker::new();
        tracker.start_tool_call("call_1", "search");
        std::thread::sleep(Duration::from_millis(50));
        tracker.start_tool_call("call_1", "fetch");

        let elapsed = tracker.end_tool_call("call_1");
        assert!(elapsed < Duration::from_millis(50));
    }

    #[test]
    fn test_discard_keeps_mapping() {
        let tracker = ToolCallTracker::new();
        let ext = tracker.get_or_create_tool_call_id(Some("abc"));
        tracker.start_tool_call(&ext, "search");

        assert!(tracker.discard_tool_call(&ext));
        assert!(!tracker.discard_tool_call(&ext));
        assert_eq!(tracker.active_call_count(), 0);
        assert_eq!(tracker.get_tool_call_id(Some("abc")), ext);
    }

    #[test]
    fn test_reset_clears_everything() {
        let tracker = ToolCallTracker::new();
        let before = tracker.get_or_create_tool_call_id(Some("abc"));
        tracker.start_tool_call(&before, "search");

        tracker.reset();

        assert_eq!(tracker.mapping_count(), 0);
        assert_eq!(tracker.active_call_count(), 0);
        assert_ne!(tracker.get_or_create_tool_call_id(Some("abc")), before);
    }

    #[test]
    fn test_concurrent_get_or_create_single_winner() {
        let tracker = Arc::new(ToolCallTracker::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.get_or_create_tool_call_id(Some("shared-key")))
            })
            .collect();

        let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(tracker.mapping_count(), 1);
    }
}

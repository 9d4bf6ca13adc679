//! RpcDispatcher's bookkeeping: a typed request tracker keyed by
//! `(requestType, requestId)` with bounded timeouts (spec §4.7, §9
//! REDESIGN FLAGS).

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct PendingRequest {
    request_type: &'static str,
    deadline: Instant,
}

/// Tracks in-flight control-plane requests so a timed-out request can be
/// rejected locally and any late response logged and dropped (spec §4.7).
pub struct RpcTracker {
    timeout: Duration,
    compat_reject_by_code_prefix: bool,
    pending: HashMap<String, PendingRequest>,
    /// Insertion order, for the legacy fallback's "reject the oldest
    /// pending" behavior.
    order: Vec<String>,
}

impl RpcTracker {
    #[must_use]
    pub fn new(timeout: Duration, compat_reject_by_code_prefix: bool) -> Self {
        Self {
            timeout,
            compat_reject_by_code_prefix,
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn track(&mut self, request_id: String, request_type: &'static str) {
        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                request_type,
                deadline: Instant::now() + self.timeout,
            },
        );
        self.order.push(request_id);
    }

    /// Call when a response correlated by `requestId` is about to be sent.
    /// Returns `true` if the request was still pending (and is now
    /// resolved); `false` means it already timed out — the caller should
    /// log and drop the late response rather than send it (spec §4.7).
    pub fn resolve(&mut self, request_id: &str) -> bool {
        if self.pending.remove(request_id).is_some() {
            self.order.retain(|id| id != request_id);
            true
        } else {
            false
        }
    }

    /// Drains every request whose deadline has passed. The caller sends
    /// `{type: error, code: RPC_TIMEOUT, requestId}` for each.
    pub fn sweep_timed_out(&mut self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, req)| req.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending.remove(id);
            self.order.retain(|o| o != id);
        }
        expired
    }

    /// Legacy compatibility path (off by default): some very old clients
    /// sent error responses without a `requestId`, identifying the failed
    /// request only by a code prefix matching its `requestType`. When
    /// enabled, reject the oldest pending request whose type starts with
    /// `code_prefix`. Returns the rejected `requestId`, if any.
    pub fn legacy_reject_by_code_prefix(&mut self, code_prefix: &str) -> Option<String> {
        if !self.compat_reject_by_code_prefix {
            return None;
        }
        let request_id = self.order.iter().find_map(|id| {
            let req = self.pending.get(id)?;
            req.request_type.starts_with(code_prefix).then(|| id.clone())
        })?;
        self.pending.remove(&request_id);
        self.order.retain(|id| id != &request_id);
        Some(request_id)
    }

    #[must_use]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_removes_pending_request() {
        let mut tracker = RpcTracker::new(Duration::from_secs(300), false);
        tracker.track("r1".into(), "create_manager");
        assert!(tracker.resolve("r1"));
        assert!(!tracker.resolve("r1"));
    }

    #[test]
    fn sweep_finds_only_expired_requests() {
        let mut tracker = RpcTracker::new(Duration::from_millis(0), false);
        tracker.track("r1".into(), "create_manager");
        std::thread::sleep(Duration::from_millis(5));
        let expired = tracker.sweep_timed_out();
        assert_eq!(expired, vec!["r1".to_string()]);
    }

    #[test]
    fn legacy_fallback_is_inert_by_default() {
        let mut tracker = RpcTracker::new(Duration::from_secs(300), false);
        tracker.track("r1".into(), "create_manager");
        assert_eq!(tracker.legacy_reject_by_code_prefix("create"), None);
        assert!(tracker.is_pending("r1"));
    }

    #[test]
    fn legacy_fallback_rejects_oldest_matching_when_enabled() {
        let mut tracker = RpcTracker::new(Duration::from_secs(300), true);
        tracker.track("r1".into(), "create_manager");
        tracker.track("r2".into(), "create_manager");
        let rejected = tracker.legacy_reject_by_code_prefix("create");
        assert_eq!(rejected, Some("r1".to_string()));
        assert!(tracker.is_pending("r2"));
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tollgate_core::config::MemoryConfig;
use tollgate_core::types::{Turn, WorkItemId};

/// Conversational context remembered for one work item.
#[derive(Debug, Clone)]
pub struct Session {
    turns: VecDeque<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            turns: VecDeque::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Turns in insertion order, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// In-process session store keyed by work item.
///
/// Each session holds at most `max_turns` turns; appending past the bound
/// evicts the oldest turn. Sessions are never persisted. When an idle TTL is
/// configured, sessions untouched for longer than the TTL are removed by
/// [`SessionMemory::purge_expired`] (or the sweeper task).
pub struct SessionMemory {
    sessions: Mutex<HashMap<WorkItemId, Session>>,
    max_turns: usize,
    idle_ttl: Option<Duration>,
}

impl SessionMemory {
    pub const DEFAULT_MAX_TURNS: usize = 50;

    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
            idle_ttl: None,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        let mut memory = Self::new(config.max_turns);
        memory.idle_ttl = config.idle_ttl();
        memory
    }

    /// Expire sessions idle for longer than `ttl`.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkItemId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the session for a work item, creating an empty one if absent.
    /// Returns a snapshot; later appends are not reflected in it.
    pub fn get_or_create(&self, id: &WorkItemId) -> Session {
        let mut sessions = self.lock();
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            debug!(work_item_id = %id, "Creating session");
            Session::new()
        });
        session.last_active = Utc::now();
        session.clone()
    }

    /// Append a turn, evicting the oldest once the bound is exceeded.
    pub fn append(&self, id: &WorkItemId, turn: Turn) {
        let mut sessions = self.lock();
        let session = sessions.entry(id.clone()).or_insert_with(Session::new);
        session.turns.push_back(turn);
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
        session.last_active = Utc::now();
    }

    /// Copy of a session's turns, oldest first. Empty if the session is absent.
    pub fn turns(&self, id: &WorkItemId) -> Vec<Turn> {
        self.lock()
            .get(id)
            .map(|s| s.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a session. Returns true if one existed.
    pub fn clear(&self, id: &WorkItemId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            debug!(work_item_id = %id, "Cleared session");
        }
        removed
    }

    /// Remove every session. Meant for tests and resets.
    pub fn clear_all(&self) {
        self.lock().clear();
        info!("Cleared all sessions");
    }

    /// Pure lookup; does not create or touch the session.
    pub fn exists(&self, id: &WorkItemId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove sessions idle past the TTL as of `now`. Returns how many were removed.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };

        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_active <= ttl);
        before - sessions.len()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// Periodically purge expired sessions until cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let memory = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session sweeper cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let purged = memory.purge_expired();
                        if purged > 0 {
                            info!(purged, "Expired idle sessions");
                        }
                    }
                }
            }
        })
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_TURNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: usize) -> Turn {
        Turn::new("maker", format!("request {n}"), format!("response {n}"))
    }

    #[test]
    fn get_or_create_creates_empty_session() {
        let memory = SessionMemory::default();
        let id = WorkItemId::from("REQ-1");
        assert!(!memory.exists(&id));

        let session = memory.get_or_create(&id);
        assert!(session.is_empty());
        assert!(memory.exists(&id));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn append_evicts_oldest_first() {
        let memory = SessionMemory::default();
        let id = WorkItemId::from("REQ-2");

        for n in 1..=51 {
            memory.append(&id, turn(n));
        }

        let turns = memory.turns(&id);
        assert_eq!(turns.len(), 50);
        assert_eq!(turns[0].request, "request 2");
        assert_eq!(turns[49].request, "request 51");
    }

    #[test]
    fn custom_bound_is_respected() {
        let memory = SessionMemory::new(3);
        let id = WorkItemId::from("REQ-3");
        for n in 1..=5 {
            memory.append(&id, turn(n));
        }
        let requests: Vec<_> = memory.turns(&id).into_iter().map(|t| t.request).collect();
        assert_eq!(requests, vec!["request 3", "request 4", "request 5"]);
    }

    #[test]
    fn snapshot_is_detached() {
        let memory = SessionMemory::default();
        let id = WorkItemId::from("REQ-4");
        let snapshot = memory.get_or_create(&id);
        memory.append(&id, turn(1));
        assert!(snapshot.is_empty());
        assert_eq!(memory.get_or_create(&id).len(), 1);
    }

    #[test]
    fn clear_and_clear_all() {
        let memory = SessionMemory::default();
        let a = WorkItemId::from("A");
        let b = WorkItemId::from("B");
        memory.append(&a, turn(1));
        memory.append(&b, turn(1));

        assert!(memory.clear(&a));
        assert!(!memory.clear(&a));
        assert!(!memory.exists(&a));
        assert!(memory.exists(&b));

        memory.clear_all();
        assert!(memory.is_empty());
    }

    #[test]
    fn exists_has_no_side_effect() {
        let memory = SessionMemory::default();
        let id = WorkItemId::from("ghost");
        assert!(!memory.exists(&id));
        assert!(memory.is_empty());
        assert!(memory.turns(&id).is_empty());
        assert!(memory.is_empty());
    }

    #[test]
    fn purge_removes_only_idle_sessions() {
        let memory = SessionMemory::default().with_idle_ttl(Duration::from_secs(60));
        let id = WorkItemId::from("REQ-5");
        memory.append(&id, turn(1));

        assert_eq!(memory.purge_expired(), 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(memory.purge_expired_at(later), 1);
        assert!(!memory.exists(&id));
    }

    #[test]
    fn purge_without_ttl_keeps_everything() {
        let memory = SessionMemory::default();
        memory.append(&WorkItemId::from("X"), turn(1));
        let far_future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(memory.purge_expired_at(far_future), 0);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn concurrent_appends_to_different_keys() {
        let memory = Arc::new(SessionMemory::new(10));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    let id = WorkItemId::from(format!("item-{i}"));
                    for n in 0..20 {
                        memory.append(&id, turn(n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(memory.len(), 8);
        for i in 0..8 {
            assert_eq!(memory.turns(&WorkItemId::from(format!("item-{i}"))).len(), 10);
        }
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let memory = Arc::new(SessionMemory::default().with_idle_ttl(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let handle = memory.spawn_sweeper(Duration::from_millis(10), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn zero_sweep_interval_does_not_panic() {
        let memory = Arc::new(SessionMemory::default().with_idle_ttl(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let handle = memory.spawn_sweeper(Duration::ZERO, cancel.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}

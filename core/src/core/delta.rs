//! Snapshot/Delta Engine (spec §4.3).
//!
//! Computes `{upserts, removed}` between a cached snapshot set and a fresh
//! one, debounces coalesced emission requests, and hands finished events to
//! whatever sink the caller wires in (the Transport, in production; a
//! `Vec`-collecting fake in tests). Comparison runs on detached
//! [`SessionSnapshot`] copies, outside the Session Manager lock, per spec
//! §4.3 "runs outside the Session Manager lock to keep mutation latency
//! bounded".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use super::events::{EventKind, SnapshotDeltaPayload};
use super::session_manager::SessionManager;
use super::snapshot::{SessionSetSnapshot, SessionSnapshot};

pub const SNAPSHOT_COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// What the delta engine hands off for the Transport to serialize and send.
#[derive(Debug, Clone)]
pub enum Emission {
    FullSnapshot(Vec<SessionSnapshot>),
    Delta(SnapshotDeltaPayload),
}

struct Cache {
    previous: Option<SessionSetSnapshot>,
}

/// Debounced projector. `request(kind)` is called from anywhere in the
/// engine (Session Manager mutation sites, Output Flush Manager activity
/// sweep); immediate-policy events emit synchronously on the calling task,
/// coalesced ones arm (or no-op into) a shared timer.
pub struct DeltaEngine {
    session_manager: Arc<SessionManager>,
    cache: Mutex<Cache>,
    emit_tx: mpsc::UnboundedSender<Emission>,
    timer_armed: std::sync::atomic::AtomicBool,
}

impl DeltaEngine {
    pub fn new(session_manager: Arc<SessionManager>) -> (Arc<Self>, mpsc::UnboundedReceiver<Emission>) {
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(DeltaEngine {
            session_manager,
            cache: Mutex::new(Cache { previous: None }),
            emit_tx,
            timer_armed: std::sync::atomic::AtomicBool::new(false),
        });
        (engine, emit_rx)
    }

    /// Entry point for any component requesting an emission (spec §4.3
    /// "Debounce and event policy").
    pub async fn request(self: &Arc<Self>, kind: EventKind) {
        let policy = kind.policy();
        if !policy.triggers_snapshot {
            return;
        }
        if policy.bypasses_debounce {
            self.emit_now().await;
            return;
        }
        self.arm_coalesce_timer();
    }

    fn arm_coalesce_timer(self: &Arc<Self>) {
        use std::sync::atomic::Ordering;
        if self.timer_armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            sleep(SNAPSHOT_COALESCE_WINDOW).await;
            engine.timer_armed.store(false, Ordering::Release);
            engine.emit_now().await;
        });
    }

    /// Cache protocol (spec §4.3): a single guard held across read, compute,
    /// and replace so at most one `emit_now` body runs at a time (spec §5
    /// "a new emission never runs until the previous finishes computing its
    /// delta"). The Session Manager's own read lock is still only ever taken
    /// *after* this lock, so lock ordering `delta_cache → session_read` holds.
    async fn emit_now(self: &Arc<Self>) {
        let mut cache = self.cache.lock().await;

        let new_snapshot = self.session_manager.snapshot();

        let emission = match &cache.previous {
            None => Emission::FullSnapshot(new_snapshot.sessions.clone()),
            Some(prev) => {
                let delta = compute_delta(prev, &new_snapshot);
                Emission::Delta(delta)
            }
        };

        cache.previous = Some(new_snapshot);
        drop(cache);

        // Emission happens outside the lock (spec §9 "Coroutine / async
        // control flow": lock -> mutate -> collect -> unlock -> emit).
        let _ = self.emit_tx.send(emission);
    }

    /// Forces the next emission to be a full snapshot, used on a fresh
    /// Transport connection.
    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.lock().await;
        cache.previous = None;
    }
}

/// `upserts`: sessions in `new` absent or structurally different from
/// `old`. `removed`: session names in `old` absent from `new` (spec §4.3).
pub fn compute_delta(old: &SessionSetSnapshot, new: &SessionSetSnapshot) -> SnapshotDeltaPayload {
    let old_by_name = old.by_name();
    let new_by_name = new.by_name();

    let upserts = new
        .sessions
        .iter()
        .filter(|s| match old_by_name.get(s.name.as_str()) {
            Some(prev) => *prev != s,
            None => true,
        })
        .cloned()
        .collect();

    let removed = old
        .sessions
        .iter()
        .filter(|s| !new_by_name.contains_key(s.name.as_str()))
        .map(|s| s.name.clone())
        .collect();

    SnapshotDeltaPayload { upserts, removed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str, id: u32) -> SessionSnapshot {
        SessionSnapshot {
            id,
            name: name.to_string(),
            root_path: "/tmp".to_string(),
            worktree: None,
            active_window_id: 1,
            is_agent_team: false,
            use_claude_env: false,
            use_pane_env: false,
            env: Default::default(),
            last_activity: chrono::Utc::now(),
            status: crate::core::model::SessionStatus::Attached,
            windows: Vec::new(),
        }
    }

    #[test]
    fn no_mutation_yields_empty_delta() {
        let a = SessionSetSnapshot {
            sessions: vec![snap("s1", 1)],
        };
        let b = a.clone();
        let delta = compute_delta(&a, &b);
        assert!(delta.upserts.is_empty());
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn removed_session_name_is_reported() {
        let a = SessionSetSnapshot {
            sessions: vec![snap("s1", 1), snap("s2", 2)],
        };
        let b = SessionSetSnapshot {
            sessions: vec![snap("s1", 1)],
        };
        let delta = compute_delta(&a, &b);
        assert_eq!(delta.removed, vec!["s2".to_string()]);
        assert!(delta.upserts.is_empty());
    }

    #[test]
    fn structurally_changed_session_is_an_upsert() {
        let a = SessionSetSnapshot {
            sessions: vec![snap("s1", 1)],
        };
        let mut changed = snap("s1", 1);
        changed.root_path = "/elsewhere".to_string();
        let b = SessionSetSnapshot {
            sessions: vec![changed],
        };
        let delta = compute_delta(&a, &b);
        assert_eq!(delta.upserts.len(), 1);
        assert!(delta.removed.is_empty());
    }
}

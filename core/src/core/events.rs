//! Shared event-envelope types for Transport text frames (spec §6).

use serde::{Deserialize, Serialize};

use super::snapshot::SessionSnapshot;

/// Event identifiers carried as `Envelope.kind` (spec §6 "Events include").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    #[serde(rename = "tmux:snapshot")]
    Snapshot,
    #[serde(rename = "tmux:snapshot-delta")]
    SnapshotDelta,
    #[serde(rename = "tmux:active-session")]
    ActiveSession,
    #[serde(rename = "tmux:session-created")]
    SessionCreated,
    #[serde(rename = "tmux:session-killed")]
    SessionKilled,
    #[serde(rename = "tmux:layout-changed")]
    LayoutChanged,
    #[serde(rename = "tmux:worker-panic")]
    WorkerPanic,
    #[serde(rename = "tmux:worker-fatal")]
    WorkerFatal,
    #[serde(rename = "app:error-logged")]
    AppErrorLogged,
    #[serde(rename = "app:input-history-updated")]
    AppInputHistoryUpdated,
    #[serde(rename = "config:load-failed")]
    ConfigLoadFailed,
    #[serde(rename = "app:config-updated")]
    AppConfigUpdated,
}

/// Per-event static policy (spec §4.3 "Debounce and event policy").
#[derive(Debug, Clone, Copy)]
pub struct EventPolicy {
    pub triggers_snapshot: bool,
    pub bypasses_debounce: bool,
}

impl EventKind {
    pub fn policy(self) -> EventPolicy {
        use EventKind::*;
        match self {
            SessionCreated | SessionKilled | ActiveSession | AppConfigUpdated => EventPolicy {
                triggers_snapshot: true,
                bypasses_debounce: true,
            },
            LayoutChanged => EventPolicy {
                triggers_snapshot: true,
                bypasses_debounce: false,
            },
            Snapshot | SnapshotDelta => EventPolicy {
                triggers_snapshot: false,
                bypasses_debounce: false,
            },
            WorkerPanic | WorkerFatal | AppErrorLogged | AppInputHistoryUpdated | ConfigLoadFailed => {
                EventPolicy {
                    triggers_snapshot: false,
                    bypasses_debounce: false,
                }
            }
        }
    }
}

/// Delta payload: sessions added-or-changed, and names removed (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDeltaPayload {
    pub upserts: Vec<SessionSnapshot>,
    pub removed: Vec<String>,
}

/// Wire envelope for text frames: `{ "type": <event>, "payload": <opaque> }`
/// (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    #[serde(rename = "type")]
    pub kind_str: String,
    pub payload: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(type_str: impl Into<String>, payload: T) -> Self {
        Envelope {
            kind_str: type_str.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_implies_trigger_for_every_policy() {
        let all = [
            EventKind::Snapshot,
            EventKind::SnapshotDelta,
            EventKind::ActiveSession,
            EventKind::SessionCreated,
            EventKind::SessionKilled,
            EventKind::LayoutChanged,
            EventKind::WorkerPanic,
            EventKind::WorkerFatal,
            EventKind::AppErrorLogged,
            EventKind::AppInputHistoryUpdated,
            EventKind::ConfigLoadFailed,
            EventKind::AppConfigUpdated,
        ];
        for kind in all {
            let policy = kind.policy();
            if policy.bypasses_debounce {
                assert!(policy.triggers_snapshot, "{kind:?} bypasses but doesn't trigger");
            }
        }
    }
}

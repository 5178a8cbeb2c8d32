//! Detached value types returned to callers (spec §3 "All deep reads ...
//! yield structures that share no mutable memory with the engine", §4.3
//! Projection model).
//!
//! These are built only while holding the Session Manager's read lock and
//! never retain `Terminal` handles or arena back-pointers — every field is
//! owned data, so a `SessionSnapshot` can be freely cloned, compared,
//! serialized, or handed across an await point with no aliasing to the live
//! model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{LayoutTree, Pane, Session, SessionStatus, Window, Worktree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneSnapshot {
    pub id: u32,
    pub id_string: String,
    pub title: String,
    pub work_dir: String,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub last_activity: DateTime<Utc>,
}

impl From<&Pane> for PaneSnapshot {
    fn from(p: &Pane) -> Self {
        PaneSnapshot {
            id: p.id.0,
            id_string: p.id_string.clone(),
            title: p.title.clone(),
            work_dir: p.work_dir.clone(),
            env: p.env.clone(),
            cols: p.cols,
            rows: p.rows,
            last_activity: p.last_activity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub id: u32,
    pub id_string: String,
    pub name: String,
    pub index: usize,
    pub active_pane_index: usize,
    pub panes: Vec<PaneSnapshot>,
    pub layout: LayoutTree,
}

impl WindowSnapshot {
    pub fn from_live(w: &Window, panes_by_id: &HashMap<super::model::PaneId, &Pane>) -> Self {
        WindowSnapshot {
            id: w.id.0,
            id_string: w.id.id_string(),
            name: w.name.clone(),
            index: w.index,
            active_pane_index: w.active_pane_index,
            panes: w
                .panes
                .iter()
                .filter_map(|pid| panes_by_id.get(pid).map(|p| PaneSnapshot::from(*p)))
                .collect(),
            layout: w.layout.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: u32,
    pub name: String,
    pub root_path: String,
    pub worktree: Option<Worktree>,
    pub active_window_id: u32,
    pub is_agent_team: bool,
    pub use_claude_env: bool,
    pub use_pane_env: bool,
    pub env: HashMap<String, String>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub windows: Vec<WindowSnapshot>,
}

impl SessionSnapshot {
    pub fn build(
        session: &Session,
        windows_by_id: &HashMap<super::model::WindowId, &Window>,
        panes_by_id: &HashMap<super::model::PaneId, &Pane>,
    ) -> Self {
        SessionSnapshot {
            id: session.id.0,
            name: session.name.clone(),
            root_path: session.root_path.clone(),
            worktree: session.worktree.clone(),
            active_window_id: session.active_window_id.0,
            is_agent_team: session.is_agent_team,
            use_claude_env: session.use_claude_env,
            use_pane_env: session.use_pane_env,
            env: session.env.clone(),
            last_activity: session.last_activity,
            status: session.status,
            windows: session
                .windows
                .iter()
                .filter_map(|wid| windows_by_id.get(wid))
                .map(|w| WindowSnapshot::from_live(w, panes_by_id))
                .collect(),
        }
    }
}

/// The full set of sessions at one instant, keyed by name for delta
/// computation (spec §4.3 "removed: session names present in old and
/// absent from new").
#[derive(Debug, Clone, Default)]
pub struct SessionSetSnapshot {
    pub sessions: Vec<SessionSnapshot>,
}

impl SessionSetSnapshot {
    pub fn by_name(&self) -> HashMap<&str, &SessionSnapshot> {
        self.sessions.iter().map(|s| (s.name.as_str(), s)).collect()
    }
}

//! Live in-memory model types owned exclusively by the Session Manager
//! (spec §3 Data Model, §9 "Cyclic references").
//!
//! The teacher's model used back-pointers for convenience (a `Pane` knew its
//! parent `Window`, which knew its `Session`). Here the model is an arena of
//! ids instead: `Session` holds `WindowId`s, `Window` holds `PaneId`s, and
//! the Session Manager owns the `HashMap<Id, T>` arenas. Nothing in this
//! module is `Clone`-cheap on purpose — these are the live values; detached
//! copies live in [`crate::core::snapshot`].

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::terminal::TerminalHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaneId(pub u32);

impl WindowId {
    pub fn id_string(self) -> String {
        format!("@{}", self.0)
    }
}

impl PaneId {
    pub fn id_string(self) -> String {
        format!("%{}", self.0)
    }
}

/// A git-style working-tree alternate directory associated with a Session
/// (spec §3, GLOSSARY). Orchestration (actually creating/removing the
/// worktree on disk) is out of scope; this is a plain descriptor callers
/// attach to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub path: String,
    pub branch: String,
    pub detached: bool,
    pub base_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

/// Session lifecycle state (spec §4.4 "State machine: session lifecycle").
/// `fresh` is transient -- `create_session` moves straight to `Attached` --
/// and `killed` is never stored: a killed session is simply removed from
/// the model entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Attached,
    Detached,
}

/// Binary tree whose leaves reference pane ids and whose internal nodes are
/// splits with a size ratio in `[0, 1]` (spec §3 Window, §9 invariant
/// "LayoutTree leaves are exactly the current pane set").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayoutTree {
    // Leaf/Split variants defined below; Clone is derived so `remove_leaf`
    // can collapse a split by cloning the surviving sibling subtree.
    Leaf(PaneId),
    Split {
        direction: SplitDirection,
        ratio: f64,
        first: Box<LayoutTree>,
        second: Box<LayoutTree>,
    },
}

impl LayoutTree {
    pub fn leaf(pane: PaneId) -> Self {
        LayoutTree::Leaf(pane)
    }

    /// Collects every pane id referenced by a leaf, in left-to-right order.
    pub fn leaves(&self) -> Vec<PaneId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<PaneId>) {
        match self {
            LayoutTree::Leaf(id) => out.push(*id),
            LayoutTree::Split { first, second, .. } => {
                first.collect_leaves(out);
                second.collect_leaves(out);
            }
        }
    }

    /// Replaces the leaf holding `target` with a split containing `target`
    /// and `new_pane`, used by `split-window` (spec §4.4). Returns `true` if
    /// a leaf was found and replaced.
    pub fn split_leaf(
        &mut self,
        target: PaneId,
        new_pane: PaneId,
        direction: SplitDirection,
        ratio: f64,
    ) -> bool {
        match self {
            LayoutTree::Leaf(id) if *id == target => {
                *self = LayoutTree::Split {
                    direction,
                    ratio,
                    first: Box::new(LayoutTree::Leaf(target)),
                    second: Box::new(LayoutTree::Leaf(new_pane)),
                };
                true
            }
            LayoutTree::Leaf(_) => false,
            LayoutTree::Split { first, second, .. } => {
                first.split_leaf(target, new_pane, direction, ratio)
                    || second.split_leaf(target, new_pane, direction, ratio)
            }
        }
    }

    /// Removes the leaf holding `target`, collapsing its parent split into
    /// the sibling subtree. Returns `true` if the pane was found and
    /// removed; returns `false` if `target` is the tree's only leaf (the
    /// caller must remove the window instead).
    pub fn remove_leaf(&mut self, target: PaneId) -> bool {
        if let LayoutTree::Split { first, second, .. } = self {
            if let LayoutTree::Leaf(id) = first.as_ref() {
                if *id == target {
                    *self = (**second).clone();
                    return true;
                }
            }
            if let LayoutTree::Leaf(id) = second.as_ref() {
                if *id == target {
                    *self = (**first).clone();
                    return true;
                }
            }
            return first.remove_leaf(target) || second.remove_leaf(target);
        }
        false
    }
}

pub struct Pane {
    pub id: PaneId,
    pub id_string: String,
    pub title: String,
    pub work_dir: String,
    pub env: HashMap<String, String>,
    pub terminal: TerminalHandle,
    pub cols: u16,
    pub rows: u16,
    pub last_activity: DateTime<Utc>,
    /// Wall-clock instant of last output, used for idle/active bookkeeping
    /// by the Snapshot/Delta Engine's sync-pane-states walk (spec §4.3).
    pub last_output_at: Instant,
}

pub struct Window {
    pub id: WindowId,
    pub name: String,
    pub index: usize,
    pub panes: Vec<PaneId>,
    pub active_pane_index: usize,
    pub layout: LayoutTree,
}

pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub root_path: String,
    pub worktree: Option<Worktree>,
    pub windows: Vec<WindowId>,
    pub active_window_id: WindowId,
    pub is_agent_team: bool,
    pub use_claude_env: bool,
    pub use_pane_env: bool,
    pub env: HashMap<String, String>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    /// Effective working directory for new panes: the Worktree path when
    /// present, else `RootPath` (spec §4.4 *split-window*).
    pub fn effective_work_dir(&self) -> &str {
        match &self.worktree {
            Some(wt) => &wt.path,
            None => &self.root_path,
        }
    }
}

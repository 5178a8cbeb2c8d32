//! Authoritative in-memory model of sessions/windows/panes (spec §4.2).
//!
//! A single `std::sync::RwLock<Model>` protects the whole arena — no
//! sharding, no per-session locks, the way a `DashMap`-based registry would
//! do it. Every mutation that can affect a projection bumps `generation`.
//! Methods never hold the lock across an `.await`; PTY spawn and Terminal
//! writes are the only blocking calls made while the write lock is held,
//! and they are brief, synchronous OS calls rather than async suspension
//! points (see DESIGN.md for why this is judged acceptable here).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use super::error::AppError;
use super::model::{
    LayoutTree, Pane, PaneId, Session, SessionId, SessionStatus, SplitDirection, Window, WindowId, Worktree,
};
use super::snapshot::{PaneSnapshot, SessionSetSnapshot, SessionSnapshot, WindowSnapshot};
use super::target::{parse_target, Target};
use super::terminal::TerminalHandle;

/// Environment variable keys a new pane never inherits (spec §4.4
/// *split-window* "blocked-system-key list").
pub const BLOCKED_ENV_KEYS: &[&str] = &["PATH", "COMSPEC", "SYSTEMROOT"];

/// Capability used by the Session Manager to attach a PTY to a new pane.
/// Kept as a narrow trait so tests can substitute a fake spawner that
/// hands back `FakeTerminal` instances (spec §9 "dynamic dispatch").
pub trait PaneSpawner: Send + Sync {
    fn spawn(
        &self,
        label: &str,
        cwd: &str,
        env: &HashMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalHandle, super::terminal::TerminalError>;
}

/// Production spawner backed by [`super::pty::PtyTerminal`].
pub struct RealPaneSpawner;

impl PaneSpawner for RealPaneSpawner {
    fn spawn(
        &self,
        label: &str,
        cwd: &str,
        env: &HashMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalHandle, super::terminal::TerminalError> {
        super::pty::PtyTerminal::spawn(label, Some(cwd), env, cols, rows).map(|t| t as TerminalHandle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

pub struct RemovePaneOutcome {
    pub surviving_pane_id: Option<PaneId>,
    pub empty_window: bool,
    pub empty_session: bool,
}

pub struct RemoveWindowOutcome {
    pub surviving_window_id: Option<WindowId>,
    pub empty_session: bool,
}

/// Options for creating the first pane/window of a session, or a new pane
/// via `split-window`. `env` is the fully-merged, already-filtered map.
pub struct NewPaneSpec<'a> {
    pub work_dir: &'a str,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Default)]
struct Model {
    sessions: HashMap<SessionId, Session>,
    windows: HashMap<WindowId, Window>,
    panes: HashMap<PaneId, Pane>,
    next_session_id: u32,
    next_window_id: u32,
    next_pane_id: u32,
    generation: u64,
    /// Pane active immediately before the current one, per session —
    /// resolves `!`/`{last}` (spec §6).
    previous_active_pane: HashMap<SessionId, PaneId>,
    /// Session most recently made active, across the whole process.
    last_active_session: Option<SessionId>,
}

impl Model {
    fn alloc_session_id(&mut self) -> SessionId {
        self.next_session_id += 1;
        SessionId(self.next_session_id)
    }

    fn alloc_window_id(&mut self) -> WindowId {
        self.next_window_id += 1;
        WindowId(self.next_window_id)
    }

    fn alloc_pane_id(&mut self) -> PaneId {
        self.next_pane_id += 1;
        PaneId(self.next_pane_id)
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
    }

    fn session_by_name(&self, name: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.name == name)
    }

    /// Repairs `active_window_id`/`active_pane_index` if they went stale
    /// (spec §3 invariants, §4.2 "auto-repairs"). `window_id` names the
    /// specific window whose `active_pane_index` the caller observed out of
    /// range -- it may differ from the session's `active_window_id` (e.g. a
    /// target naming an explicit window index), so it is repaired in
    /// addition to, not instead of, the session's own active-window check.
    /// Returns true if a repair happened (caller should bump generation).
    fn repair_session(&mut self, session_id: SessionId, window_id: Option<WindowId>) -> bool {
        let mut repaired = false;
        let window_ids: Vec<WindowId> = match self.sessions.get(&session_id) {
            Some(s) => s.windows.clone(),
            None => return false,
        };
        let active_window_id = self.sessions.get(&session_id).unwrap().active_window_id;
        if !window_ids.contains(&active_window_id) {
            if let Some(first) = window_ids.first().copied() {
                self.sessions.get_mut(&session_id).unwrap().active_window_id = first;
                repaired = true;
            }
        }
        if let Some(window_id) = window_id {
            if let Some(window) = self.windows.get_mut(&window_id) {
                if window.active_pane_index >= window.panes.len() && !window.panes.is_empty() {
                    window.active_pane_index = 0;
                    repaired = true;
                }
            }
        }
        repaired
    }

    fn pane_snapshot(&self, pane_id: PaneId) -> Option<PaneSnapshot> {
        self.panes.get(&pane_id).map(PaneSnapshot::from)
    }

    fn session_snapshot(&self, session_id: SessionId) -> Option<SessionSnapshot> {
        let session = self.sessions.get(&session_id)?;
        let windows_by_id: HashMap<WindowId, &Window> =
            session.windows.iter().filter_map(|id| self.windows.get(id).map(|w| (*id, w))).collect();
        let panes_by_id: HashMap<PaneId, &Pane> = self.panes.iter().map(|(id, p)| (*id, p)).collect();
        Some(SessionSnapshot::build(session, &windows_by_id, &panes_by_id))
    }

    fn window_of_pane(&self, pane_id: PaneId) -> Option<WindowId> {
        self.windows
            .values()
            .find(|w| w.panes.contains(&pane_id))
            .map(|w| w.id)
    }

    fn session_of_window(&self, window_id: WindowId) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.windows.contains(&window_id))
            .map(|s| s.id)
    }
}

pub struct SessionManager {
    model: RwLock<Model>,
    spawner: Arc<dyn PaneSpawner>,
}

impl SessionManager {
    pub fn new(spawner: Arc<dyn PaneSpawner>) -> Self {
        SessionManager {
            model: RwLock::new(Model::default()),
            spawner,
        }
    }

    pub fn generation(&self) -> u64 {
        self.model.read().unwrap().generation
    }

    /// `create_session` (spec §4.2 public contract table).
    #[allow(clippy::too_many_arguments)]
    pub fn create_session(
        &self,
        name: &str,
        root_path: &str,
        width: u16,
        height: u16,
        is_agent_team: bool,
        use_claude_env: bool,
        use_pane_env: bool,
        env: HashMap<String, String>,
    ) -> Result<SessionSnapshot, AppError> {
        if width == 0 || height == 0 {
            return Err(AppError::invalid_argument("width and height must be > 0"));
        }
        if !Path::new(root_path).is_absolute() {
            return Err(AppError::invalid_argument("root_path must be absolute"));
        }
        if name.is_empty() {
            return Err(AppError::invalid_argument("session name must not be empty"));
        }

        let mut model = self.model.write().unwrap();
        if model.session_by_name(name).is_some() {
            return Err(AppError::duplicate(format!("session '{name}' already exists")));
        }

        let session_id = model.alloc_session_id();
        let window_id = model.alloc_window_id();
        let pane_id = model.alloc_pane_id();
        let pane_env = filter_blocked_keys(env.clone());

        let terminal = self
            .spawner
            .spawn(&pane_id.id_string(), root_path, &pane_env, width, height)?;

        let pane = Pane {
            id: pane_id,
            id_string: pane_id.id_string(),
            title: name.to_string(),
            work_dir: root_path.to_string(),
            env: pane_env,
            terminal,
            cols: width,
            rows: height,
            last_activity: Utc::now(),
            last_output_at: std::time::Instant::now(),
        };
        let window = Window {
            id: window_id,
            name: "0".to_string(),
            index: 0,
            panes: vec![pane_id],
            active_pane_index: 0,
            layout: LayoutTree::leaf(pane_id),
        };
        let session = Session {
            id: session_id,
            name: name.to_string(),
            root_path: root_path.to_string(),
            worktree: None,
            windows: vec![window_id],
            active_window_id: window_id,
            is_agent_team,
            use_claude_env,
            use_pane_env,
            env,
            last_activity: Utc::now(),
            status: SessionStatus::Attached,
        };

        model.panes.insert(pane_id, pane);
        model.windows.insert(window_id, window);
        model.sessions.insert(session_id, session);
        model.last_active_session = Some(session_id);
        model.bump_generation();

        Ok(model.session_snapshot(session_id).expect("just inserted"))
    }

    /// Creates a new session inheriting `is_agent_team`/`use_claude_env`/
    /// `use_pane_env` from `parent_session_id`, used by `new-window` which
    /// creates a session rather than a tab (spec §4.4 *new-window*).
    pub fn create_session_inheriting(
        &self,
        parent_session_id: SessionId,
        name: &str,
        root_path: &str,
        width: u16,
        height: u16,
    ) -> Result<SessionSnapshot, AppError> {
        let (is_agent_team, use_claude_env, use_pane_env) = {
            let model = self.model.read().unwrap();
            let parent = model
                .sessions
                .get(&parent_session_id)
                .ok_or_else(|| AppError::not_found("no such parent session"))?;
            (parent.is_agent_team, parent.use_claude_env, parent.use_pane_env)
        };
        self.create_session(
            name,
            root_path,
            width,
            height,
            is_agent_team,
            use_claude_env,
            use_pane_env,
            HashMap::new(),
        )
    }

    /// `add_pane_to_window` (spec §4.2). `ratio` must be in `[0, 1]`.
    pub fn add_pane_to_window(
        &self,
        session_id: SessionId,
        window_id: WindowId,
        direction: SplitDirection,
        ratio: f64,
        spec: NewPaneSpec,
    ) -> Result<PaneId, AppError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(AppError::invalid_argument("split ratio out of range"));
        }

        let mut model = self.model.write().unwrap();
        if !model
            .sessions
            .get(&session_id)
            .map(|s| s.windows.contains(&window_id))
            .unwrap_or(false)
        {
            return Err(AppError::not_found("no such window"));
        }
        let target_pane = {
            let window = model.windows.get(&window_id).unwrap();
            window
                .panes
                .get(window.active_pane_index)
                .copied()
                .or_else(|| window.panes.first().copied())
                .ok_or_else(|| AppError::internal("window has no panes"))?
        };

        let pane_id = model.alloc_pane_id();
        let env = filter_blocked_keys(spec.env);
        let terminal = self
            .spawner
            .spawn(&pane_id.id_string(), spec.work_dir, &env, spec.cols, spec.rows)?;

        let pane = Pane {
            id: pane_id,
            id_string: pane_id.id_string(),
            title: String::new(),
            work_dir: spec.work_dir.to_string(),
            env,
            terminal,
            cols: spec.cols,
            rows: spec.rows,
            last_activity: Utc::now(),
            last_output_at: std::time::Instant::now(),
        };
        model.panes.insert(pane_id, pane);

        let window = model.windows.get_mut(&window_id).unwrap();
        window.panes.push(pane_id);
        window.layout.split_leaf(target_pane, pane_id, direction, ratio);
        window.active_pane_index = window.panes.len() - 1;
        model.bump_generation();

        Ok(pane_id)
    }

    /// `remove_pane` (spec §4.2, §3 lifecycle "killing the last pane in the
    /// last window removes the Session"). The caller is responsible for
    /// closing the captured `Terminal` handle exactly once, outside any
    /// lock (spec §4.4 *kill-pane*); this returns the handle for that.
    pub fn remove_pane(&self, pane_id: PaneId) -> Result<(RemovePaneOutcome, TerminalHandle), AppError> {
        let mut model = self.model.write().unwrap();
        let terminal = model
            .panes
            .get(&pane_id)
            .map(|p| p.terminal.clone())
            .ok_or_else(|| AppError::not_found("no such pane"))?;

        let window_id = model
            .window_of_pane(pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))?;
        let session_id = model
            .session_of_window(window_id)
            .ok_or_else(|| AppError::internal("window not owned by any session"))?;

        model.panes.remove(&pane_id);
        let window = model.windows.get_mut(&window_id).unwrap();
        window.panes.retain(|id| *id != pane_id);
        window.layout.remove_leaf(pane_id);

        let outcome = if window.panes.is_empty() {
            model.windows.remove(&window_id);
            let session = model.sessions.get_mut(&session_id).unwrap();
            session.windows.retain(|id| *id != window_id);

            if session.windows.is_empty() {
                model.sessions.remove(&session_id);
                model.previous_active_pane.remove(&session_id);
                if model.last_active_session == Some(session_id) {
                    model.last_active_session = None;
                }
                RemovePaneOutcome {
                    surviving_pane_id: None,
                    empty_window: true,
                    empty_session: true,
                }
            } else {
                let first_window = session.windows[0];
                session.active_window_id = first_window;
                let surviving = model
                    .windows
                    .get(&first_window)
                    .and_then(|w| w.panes.first())
                    .copied();
                RemovePaneOutcome {
                    surviving_pane_id: surviving,
                    empty_window: true,
                    empty_session: false,
                }
            }
        } else {
            if window.active_pane_index >= window.panes.len() {
                window.active_pane_index = window.panes.len() - 1;
            }
            let surviving = window.panes[window.active_pane_index];
            RemovePaneOutcome {
                surviving_pane_id: Some(surviving),
                empty_window: false,
                empty_session: false,
            }
        };

        model.bump_generation();
        Ok((outcome, terminal))
    }

    /// `remove_window_by_id` (spec §4.2). Closes every pane's Terminal
    /// inside the window; returns the handles for the caller to close
    /// outside the lock.
    pub fn remove_window_by_id(
        &self,
        session_id: SessionId,
        window_id: WindowId,
    ) -> Result<(RemoveWindowOutcome, Vec<TerminalHandle>), AppError> {
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .get(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        if !session.windows.contains(&window_id) {
            return Err(AppError::not_found("no such window"));
        }

        let window = model.windows.remove(&window_id).unwrap();
        let terminals: Vec<TerminalHandle> = window
            .panes
            .iter()
            .filter_map(|pid| model.panes.remove(pid).map(|p| p.terminal))
            .collect();

        let session = model.sessions.get_mut(&session_id).unwrap();
        session.windows.retain(|id| *id != window_id);

        let outcome = if session.windows.is_empty() {
            model.sessions.remove(&session_id);
            if model.last_active_session == Some(session_id) {
                model.last_active_session = None;
            }
            RemoveWindowOutcome {
                surviving_window_id: None,
                empty_session: true,
            }
        } else {
            let first = session.windows[0];
            session.active_window_id = first;
            RemoveWindowOutcome {
                surviving_window_id: Some(first),
                empty_session: false,
            }
        };

        model.bump_generation();
        Ok((outcome, terminals))
    }

    /// `kill-session`: removes every window/pane of a session, returning
    /// the Terminal handles for the caller to close outside the lock.
    pub fn remove_session(&self, session_id: SessionId) -> Result<Vec<TerminalHandle>, AppError> {
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .remove(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        let mut terminals = Vec::new();
        for window_id in session.windows {
            if let Some(window) = model.windows.remove(&window_id) {
                for pane_id in window.panes {
                    if let Some(pane) = model.panes.remove(&pane_id) {
                        terminals.push(pane.terminal);
                    }
                }
            }
        }
        model.previous_active_pane.remove(&session_id);
        if model.last_active_session == Some(session_id) {
            model.last_active_session = None;
        }
        model.bump_generation();
        Ok(terminals)
    }

    /// `resolve_target` (spec §4.2 algorithm). `caller_pane_id` anchors
    /// `''`, `!`, and `{last}`.
    pub fn resolve_target(
        &self,
        raw_target: &str,
        caller_pane_id: Option<PaneId>,
    ) -> Result<PaneSnapshot, AppError> {
        let target = parse_target(raw_target)
            .map_err(|e| AppError::invalid_argument(e.to_string()))?;

        // Read-lock pass: try to resolve without mutation; detect staleness.
        let (resolved, repair_window, session_id) = {
            let model = self.model.read().unwrap();
            self.resolve_target_inner(&model, &target, caller_pane_id)?
        };

        let Some(session_id) = session_id else {
            return Ok(resolved);
        };
        if repair_window.is_none() {
            return Ok(resolved);
        }

        // Repair path: escalate to the write lock and re-resolve atomically.
        let mut model = self.model.write().unwrap();
        if model.repair_session(session_id, repair_window) {
            model.bump_generation();
        }
        let (resolved, _, _) = self.resolve_target_inner(&model, &target, caller_pane_id)?;
        Ok(resolved)
    }

    /// Returns `(pane, repair_window, session_id)`. `repair_window` names
    /// the specific window whose `active_pane_index` was observed stale (if
    /// any) -- NOT necessarily the session's `active_window_id` -- so
    /// `repair_session` fixes the window actually targeted rather than
    /// whichever window happens to be active on the session.
    fn resolve_target_inner(
        &self,
        model: &Model,
        target: &Target,
        caller_pane_id: Option<PaneId>,
    ) -> Result<(PaneSnapshot, Option<WindowId>, Option<SessionId>), AppError> {
        match target {
            Target::Current => {
                let pane_id =
                    caller_pane_id.ok_or_else(|| AppError::not_found("no caller pane for empty target"))?;
                let snap = model
                    .pane_snapshot(pane_id)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                Ok((snap, None, None))
            }
            Target::Bang | Target::LastBraced => {
                let caller = caller_pane_id
                    .ok_or_else(|| AppError::not_found("no caller pane for last-active target"))?;
                let window_id = model
                    .window_of_pane(caller)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                let session_id = model
                    .session_of_window(window_id)
                    .ok_or_else(|| AppError::internal("orphaned window"))?;
                let prev = model
                    .previous_active_pane
                    .get(&session_id)
                    .copied()
                    .ok_or_else(|| AppError::not_found("no last-active pane"))?;
                let snap = model
                    .pane_snapshot(prev)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                Ok((snap, None, None))
            }
            Target::PaneId(id) => {
                let pane_id = PaneId(*id);
                let snap = model
                    .pane_snapshot(pane_id)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                Ok((snap, None, None))
            }
            Target::WindowId(id) => {
                let window_id = WindowId(*id);
                let window = model
                    .windows
                    .get(&window_id)
                    .ok_or_else(|| AppError::not_found("no such window"))?;
                let needs_repair = window.active_pane_index >= window.panes.len();
                let pane_id = window
                    .panes
                    .get(window.active_pane_index.min(window.panes.len().saturating_sub(1)))
                    .copied()
                    .ok_or_else(|| AppError::not_found("window has no panes"))?;
                let session_id = model.session_of_window(window_id);
                let snap = model
                    .pane_snapshot(pane_id)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                let repair_window = if needs_repair { Some(window_id) } else { None };
                Ok((snap, repair_window, session_id))
            }
            Target::SessionRef {
                name,
                window_index,
                pane_index,
            } => {
                let matches: Vec<&Session> = model.sessions.values().filter(|s| &s.name == name).collect();
                let session = matches
                    .into_iter()
                    .max_by_key(|s| s.last_activity)
                    .ok_or_else(|| AppError::not_found(format!("no such session '{name}'")))?;
                let session_id = session.id;

                let window_id = match window_index {
                    Some(idx) => {
                        let clamped = (*idx).min(session.windows.len().saturating_sub(1));
                        session
                            .windows
                            .get(clamped)
                            .copied()
                            .ok_or_else(|| AppError::not_found("session has no windows"))?
                    }
                    None => session.active_window_id,
                };
                let session_needs_repair = !session.windows.contains(&session.active_window_id);
                let window = model
                    .windows
                    .get(&window_id)
                    .ok_or_else(|| AppError::not_found("no such window"))?;

                let pane_idx = match pane_index {
                    Some(idx) => (*idx).min(window.panes.len().saturating_sub(1)),
                    None => window.active_pane_index,
                };
                // Staleness of the *resolved* window (which may be a
                // different window than the session's active one when
                // `window_index` was given explicitly).
                let pane_needs_repair = window.active_pane_index >= window.panes.len();
                let pane_id = window
                    .panes
                    .get(pane_idx)
                    .copied()
                    .ok_or_else(|| AppError::not_found("window has no panes"))?;
                let snap = model
                    .pane_snapshot(pane_id)
                    .ok_or_else(|| AppError::not_found("no such pane"))?;
                let repair_window = if session_needs_repair || pane_needs_repair {
                    Some(window_id)
                } else {
                    None
                };
                Ok((snap, repair_window, Some(session_id)))
            }
        }
    }

    /// `resolve_directional_pane` (spec §4.2). Never panics; under
    /// concurrent removal either the pre- or post-removal neighbor is an
    /// acceptable answer (spec §8 scenario 5).
    pub fn resolve_directional_pane(
        &self,
        caller_pane_id: PaneId,
        direction: Direction,
    ) -> Result<PaneSnapshot, AppError> {
        let model = self.model.read().unwrap();
        let window_id = model
            .window_of_pane(caller_pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))?;
        let window = model.windows.get(&window_id).unwrap();
        if window.panes.len() <= 1 {
            return Err(AppError::invalid_argument("only one pane in window"));
        }
        let idx = window
            .panes
            .iter()
            .position(|id| *id == caller_pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))?;
        let next_idx = match direction {
            Direction::Next => (idx + 1) % window.panes.len(),
            Direction::Prev => (idx + window.panes.len() - 1) % window.panes.len(),
        };
        let pane_id = window.panes[next_idx];
        model
            .pane_snapshot(pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))
    }

    /// `set_active_pane` (spec §4.2).
    pub fn set_active_pane(&self, pane_id: PaneId) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        let window_id = model
            .window_of_pane(pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))?;
        let session_id = model
            .session_of_window(window_id)
            .ok_or_else(|| AppError::internal("orphaned window"))?;

        let window = model.windows.get_mut(&window_id).unwrap();
        let idx = window.panes.iter().position(|id| *id == pane_id).unwrap();
        let previous_pane = window.panes[window.active_pane_index];
        window.active_pane_index = idx;

        let session = model.sessions.get_mut(&session_id).unwrap();
        session.active_window_id = window_id;
        session.last_activity = Utc::now();

        if previous_pane != pane_id {
            model.previous_active_pane.insert(session_id, previous_pane);
        }
        model.last_active_session = Some(session_id);
        model.bump_generation();
        Ok(())
    }

    /// `list_panes_by_window_target` (spec §4.2).
    pub fn list_panes_by_window_target(&self, raw_target: &str) -> Result<Vec<PaneSnapshot>, AppError> {
        let target = parse_target(raw_target).map_err(|e| AppError::invalid_argument(e.to_string()))?;
        let model = self.model.read().unwrap();
        let (pane_snapshot, _, _) = self.resolve_target_inner(&model, &target, None)?;
        let window_id = model
            .window_of_pane(PaneId(pane_snapshot.id))
            .ok_or_else(|| AppError::not_found("no such window"))?;
        let window = model.windows.get(&window_id).unwrap();
        Ok(window
            .panes
            .iter()
            .filter_map(|id| model.pane_snapshot(*id))
            .collect())
    }

    /// `snapshot` (spec §4.2, §4.3 "built under the Session Manager's read
    /// lock and contain no references into the live model"). Sessions are
    /// returned ordered by `SessionID` (spec §4.4 *list-sessions* ordering).
    pub fn snapshot(&self) -> SessionSetSnapshot {
        let model = self.model.read().unwrap();
        let mut ids: Vec<SessionId> = model.sessions.keys().copied().collect();
        ids.sort();
        SessionSetSnapshot {
            sessions: ids
                .into_iter()
                .filter_map(|id| model.session_snapshot(id))
                .collect(),
        }
    }

    pub fn list_windows(&self, session_id: SessionId) -> Result<Vec<WindowSnapshot>, AppError> {
        let model = self.model.read().unwrap();
        let session = model
            .sessions
            .get(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        let panes_by_id: HashMap<PaneId, &Pane> = model.panes.iter().map(|(id, p)| (*id, p)).collect();
        let mut windows: Vec<WindowSnapshot> = session
            .windows
            .iter()
            .filter_map(|id| model.windows.get(id))
            .map(|w| WindowSnapshot::from_live(w, &panes_by_id))
            .collect();
        windows.sort_by_key(|w| w.index);
        Ok(windows)
    }

    /// `update_activity_by_pane_id` (spec §4.2). Returns whether the pane
    /// transitioned from idle to active. Does **not** bump `generation`
    /// (spec §4.2 "Not incremented on pure-output activity").
    pub fn update_activity_by_pane_id(&self, pane_id: PaneId) -> Result<bool, AppError> {
        let mut model = self.model.write().unwrap();
        let pane = model
            .panes
            .get_mut(&pane_id)
            .ok_or_else(|| AppError::not_found("no such pane"))?;
        let was_idle = pane.last_output_at.elapsed() > std::time::Duration::from_millis(500);
        pane.last_output_at = std::time::Instant::now();
        pane.last_activity = Utc::now();
        Ok(was_idle)
    }

    pub fn get_pane_terminal(&self, pane_id: PaneId) -> Result<TerminalHandle, AppError> {
        let model = self.model.read().unwrap();
        model
            .panes
            .get(&pane_id)
            .map(|p| p.terminal.clone())
            .ok_or_else(|| AppError::not_found("no such pane"))
    }

    pub fn session_id_by_name(&self, name: &str) -> Result<SessionId, AppError> {
        let model = self.model.read().unwrap();
        model
            .session_by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| AppError::not_found(format!("no such session '{name}'")))
    }

    pub fn rename_window(&self, window_id: WindowId, new_name: &str) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        let window = model
            .windows
            .get_mut(&window_id)
            .ok_or_else(|| AppError::not_found("no such window"))?;
        window.name = new_name.to_string();
        model.bump_generation();
        Ok(())
    }

    pub fn rename_session(&self, session_id: SessionId, new_name: &str) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        if model.session_by_name(new_name).is_some() {
            return Err(AppError::duplicate(format!("session '{new_name}' already exists")));
        }
        let session = model
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        session.name = new_name.to_string();
        model.bump_generation();
        Ok(())
    }

    pub fn set_environment(&self, session_id: SessionId, key: &str, value: &str) -> Result<(), AppError> {
        if BLOCKED_ENV_KEYS.contains(&key) {
            return Err(AppError::permission_denied(format!("'{key}' may not be set")));
        }
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        session.env.insert(key.to_string(), value.to_string());
        model.bump_generation();
        Ok(())
    }

    pub fn show_environment(&self, session_id: SessionId) -> Result<HashMap<String, String>, AppError> {
        let model = self.model.read().unwrap();
        model
            .sessions
            .get(&session_id)
            .map(|s| s.env.clone())
            .ok_or_else(|| AppError::not_found("no such session"))
    }

    /// `detach-client`: session preserved, moved to `Detached` (spec §4.4
    /// "State machine: session lifecycle").
    pub fn detach_session(&self, session_id: SessionId) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        session.status = SessionStatus::Detached;
        model.bump_generation();
        Ok(())
    }

    /// `attach-session` / `switch-client`: moves a session back to
    /// `Attached` and makes it the last-active session (spec §4.4 "active-
    /// session on re-attach"). A no-op status change if already attached.
    pub fn attach_session(&self, session_id: SessionId) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        session.status = SessionStatus::Attached;
        model.last_active_session = Some(session_id);
        model.bump_generation();
        Ok(())
    }

    pub fn resize_pane(&self, pane_id: PaneId, cols: u16, rows: u16) -> Result<(), AppError> {
        if cols == 0 || rows == 0 {
            return Err(AppError::invalid_argument("size must be > 0"));
        }
        let terminal = self.get_pane_terminal(pane_id)?;
        terminal.resize(cols, rows)?;
        let mut model = self.model.write().unwrap();
        if let Some(pane) = model.panes.get_mut(&pane_id) {
            pane.cols = cols;
            pane.rows = rows;
        }
        model.bump_generation();
        Ok(())
    }

    pub fn attach_worktree(&self, session_id: SessionId, worktree: Worktree) -> Result<(), AppError> {
        let mut model = self.model.write().unwrap();
        let session = model
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::not_found("no such session"))?;
        session.worktree = Some(worktree);
        model.bump_generation();
        Ok(())
    }
}

/// Drops keys a new pane must never inherit (spec §4.4 *split-window*).
pub fn filter_blocked_keys(env: HashMap<String, String>) -> HashMap<String, String> {
    env.into_iter()
        .filter(|(k, _)| !BLOCKED_ENV_KEYS.contains(&k.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::FakeTerminal;

    struct FakeSpawner;
    impl PaneSpawner for FakeSpawner {
        fn spawn(
            &self,
            _label: &str,
            _cwd: &str,
            _env: &HashMap<String, String>,
            _cols: u16,
            _rows: u16,
        ) -> Result<TerminalHandle, super::super::terminal::TerminalError> {
            Ok(FakeTerminal::new())
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(FakeSpawner))
    }

    #[test]
    fn create_session_rejects_bad_size() {
        let mgr = manager();
        let err = mgr
            .create_session("s1", "/tmp", 0, 24, false, false, false, HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn create_session_rejects_duplicate_name() {
        let mgr = manager();
        mgr.create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap();
        let err = mgr
            .create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Duplicate);
    }

    #[test]
    fn resolve_target_round_trips_pane_id() {
        let mgr = manager();
        let snap = mgr
            .create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap();
        let pane_id = snap.windows[0].panes[0].id;
        let resolved = mgr.resolve_target(&format!("%{pane_id}"), None).unwrap();
        assert_eq!(resolved.id, pane_id);
    }

    #[test]
    fn remove_pane_on_last_pane_kills_session() {
        let mgr = manager();
        let snap = mgr
            .create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap();
        let pane_id = PaneId(snap.windows[0].panes[0].id);
        let (outcome, _terminal) = mgr.remove_pane(pane_id).unwrap();
        assert!(outcome.empty_session);
        assert!(mgr.snapshot().sessions.is_empty());
    }

    #[test]
    fn directional_resolution_never_panics_with_two_panes() {
        let mgr = manager();
        let snap = mgr
            .create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap();
        let session_id = SessionId(snap.id);
        let window_id = WindowId(snap.active_window_id);
        let first_pane = PaneId(snap.windows[0].panes[0].id);
        mgr.add_pane_to_window(
            session_id,
            window_id,
            SplitDirection::Horizontal,
            0.5,
            NewPaneSpec {
                work_dir: "/tmp",
                env: HashMap::new(),
                cols: 80,
                rows: 24,
            },
        )
        .unwrap();

        let resolved = mgr.resolve_directional_pane(first_pane, Direction::Next).unwrap();
        assert_ne!(resolved.id, first_pane.0);
    }

    /// Regression for a `repair_session` bug: a stale `active_pane_index`
    /// on a *non-active* window (reached via an explicit `window_index`
    /// target) must repair that window specifically, not whatever window
    /// happens to be the session's `active_window_id`.
    #[test]
    fn repair_targets_the_stale_window_not_the_session_active_window() {
        let mgr = manager();
        let snap = mgr
            .create_session("s1", "/tmp", 80, 24, false, false, false, HashMap::new())
            .unwrap();
        let session_id = SessionId(snap.id);
        let active_window_id = WindowId(snap.active_window_id);
        let active_pane_id = PaneId(snap.windows[0].panes[0].id);

        // Inject a second window directly into the model with two panes and
        // a deliberately out-of-range `active_pane_index`; this window is
        // not the session's active window.
        let stale_window_id = {
            let mut model = mgr.model.write().unwrap();
            let stale_window_id = model.alloc_window_id();
            let pane_a = model.alloc_pane_id();
            let pane_b = model.alloc_pane_id();
            for pid in [pane_a, pane_b] {
                model.panes.insert(
                    pid,
                    Pane {
                        id: pid,
                        id_string: pid.id_string(),
                        title: String::new(),
                        work_dir: "/tmp".to_string(),
                        env: HashMap::new(),
                        terminal: FakeTerminal::new(),
                        cols: 80,
                        rows: 24,
                        last_activity: Utc::now(),
                        last_output_at: std::time::Instant::now(),
                    },
                );
            }
            model.windows.insert(
                stale_window_id,
                Window {
                    id: stale_window_id,
                    name: "1".to_string(),
                    index: 1,
                    panes: vec![pane_a, pane_b],
                    active_pane_index: 5, // out of range on purpose
                    layout: LayoutTree::leaf(pane_a),
                },
            );
            model.sessions.get_mut(&session_id).unwrap().windows.push(stale_window_id);
            stale_window_id
        };

        // Resolve the stale window explicitly by index; this must trigger
        // repair of `stale_window_id`, not `active_window_id`.
        let resolved = mgr.resolve_target("s1:1", None).unwrap();
        assert_ne!(resolved.id, 0);

        let snap = mgr.snapshot();
        let session_snap = snap.sessions.iter().find(|s| s.id == session_id.0).unwrap();
        let stale_window_snap = session_snap.windows.iter().find(|w| w.id == stale_window_id.0).unwrap();
        assert_eq!(stale_window_snap.active_pane_index, 0, "the stale window's own index must be repaired");

        let active_window_snap = session_snap.windows.iter().find(|w| w.id == active_window_id.0).unwrap();
        assert_eq!(
            active_window_snap.active_pane_index, 0,
            "the session's unrelated active window must be untouched"
        );
        assert_eq!(active_window_snap.panes[0].id, active_pane_id.0);
    }
}

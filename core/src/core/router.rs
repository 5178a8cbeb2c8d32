//! Command Router: tmux-subset command interpreter (spec §4.4).
//!
//! Grounded on the pack's tmux-shim `TmuxCommand`/`execute()` dispatcher:
//! one enum per supported command, a target-resolution helper, a control-key
//! translation table, and `#{...}` format expansion. Every handler returns a
//! `CommandResponse`; a panic anywhere in a handler is caught at the
//! dispatch boundary and turned into an `internal` error response (spec §9
//! "Panic / exception boundaries").

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::error::{AppError, ErrorKind};
use super::events::EventKind;
use super::model::{PaneId, SessionId, SplitDirection, WindowId};
use super::session_manager::{Direction, NewPaneSpec, SessionManager};
use super::snapshot::PaneSnapshot;
use super::terminal::Terminal;

/// Parsed request handed to the router by the shim or the GUI (spec §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub target: String,
    pub flags: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub args: Vec<String>,
    pub session_id: Option<u32>,
    pub caller_pane_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub text: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
}

impl CommandResponse {
    fn ok(text: impl Into<String>) -> Self {
        CommandResponse {
            text: text.into(),
            success: true,
            error_kind: None,
        }
    }

    fn from_err(err: AppError) -> Self {
        CommandResponse {
            text: format!("error: {}", err.message),
            success: false,
            error_kind: Some(err.kind),
        }
    }

    /// Built by the control port when a line isn't valid JSON at all (spec
    /// §7 "command-originated errors are returned to the shim as non-zero
    /// exit").
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::from_err(AppError::invalid_argument(format!("malformed request: {}", detail.into())))
    }
}

/// tmux key-token translation table (spec §4.4 *send-keys*), grounded on
/// the pack's `translate_ctrl_key` for the `C-x` family plus the common
/// named keys.
fn translate_key_token(token: &str) -> Vec<u8> {
    match token {
        "Enter" => vec![b'\r'],
        "Escape" => vec![0x1b],
        "Tab" => vec![b'\t'],
        "Space" => vec![b' '],
        "BSpace" => vec![0x7f],
        _ => {
            if let Some(rest) = token.strip_prefix("C-") {
                if let Some(byte) = control_byte(rest) {
                    return vec![byte];
                }
            }
            token.as_bytes().to_vec()
        }
    }
}

fn control_byte(key: &str) -> Option<u8> {
    let mut chars = key.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return match key {
            "[" => Some(0x1b),
            "\\" => Some(0x1c),
            "]" => Some(0x1d),
            "^" => Some(0x1e),
            "_" => Some(0x1f),
            "?" => Some(0x7f),
            _ => None,
        };
    }
    match c.to_ascii_uppercase() {
        'A'..='Z' => Some((c.to_ascii_uppercase() as u8) - b'A' + 1),
        _ => None,
    }
}

/// Expands `#{pane_id}`-style format tokens (spec §4.4 *list-panes* /
/// *display-message*, §9 glossary). Missing variables render empty.
pub fn expand_format(template: &str, pane: &PaneSnapshot, session_name: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                name.push(c2);
            }
            out.push_str(&resolve_format_var(&name, pane, session_name));
        } else {
            out.push(c);
        }
    }
    out
}

fn resolve_format_var(name: &str, pane: &PaneSnapshot, session_name: &str) -> String {
    match name {
        "pane_id" => pane.id_string.clone(),
        "pane_title" => pane.title.clone(),
        "pane_current_path" => pane.work_dir.clone(),
        "session_name" => session_name.to_string(),
        "pane_width" => pane.cols.to_string(),
        "pane_height" => pane.rows.to_string(),
        _ => String::new(),
    }
}

/// In-memory option table for `set-option`/`show-options` (spec §4.4,
/// §6). Options are scoped either global (`-g`) or per-session, mirroring
/// the scoping of [`super::session_manager::SessionManager::set_environment`]
/// but kept in the Router rather than the Session Manager since options
/// are Router-level config, not part of the Session/Window/Pane model.
struct OptionStore {
    global: HashMap<String, String>,
    per_session: HashMap<u32, HashMap<String, String>>,
}

impl OptionStore {
    fn new() -> Self {
        OptionStore {
            global: HashMap::new(),
            per_session: HashMap::new(),
        }
    }

    fn set(&mut self, session_id: Option<u32>, key: String, value: String) {
        match session_id {
            Some(id) => {
                self.per_session.entry(id).or_default().insert(key, value);
            }
            None => {
                self.global.insert(key, value);
            }
        }
    }

    /// `None` (global scope, `-g`) returns only the global table;
    /// `Some(id)` merges global with that session's overrides, the
    /// session-specific entry winning on key collision.
    fn show(&self, session_id: Option<u32>) -> HashMap<String, String> {
        match session_id {
            None => self.global.clone(),
            Some(id) => {
                let mut merged = self.global.clone();
                if let Some(session_opts) = self.per_session.get(&id) {
                    merged.extend(session_opts.clone());
                }
                merged
            }
        }
    }
}

pub struct CommandRouter {
    session_manager: Arc<SessionManager>,
    options: Mutex<OptionStore>,
}

impl CommandRouter {
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        CommandRouter {
            session_manager,
            options: Mutex::new(OptionStore::new()),
        }
    }

    /// Dispatches `req`, recovering from any panic inside the handler body
    /// (spec §4.4 "Failure semantics"). Handlers are synchronous (the
    /// Session Manager lock is a plain `std::sync::RwLock`), so the panic
    /// boundary is a direct `catch_unwind`; `async` here only matches the
    /// Transport/shim call sites, which already run inside a tokio task.
    pub async fn handle(&self, req: CommandRequest) -> (CommandResponse, Vec<EventKind>) {
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(&req))) {
            Ok((resp, events)) => (resp, events),
            Err(_) => {
                log::error!("command handler panicked: command={}", req.command);
                (
                    CommandResponse::from_err(AppError::internal("internal error handling command")),
                    Vec::new(),
                )
            }
        }
    }

    fn dispatch(&self, req: &CommandRequest) -> (CommandResponse, Vec<EventKind>) {
        let outcome = match req.command.as_str() {
            "new-session" => self.new_session(req),
            "new-window" => self.new_window(req),
            "split-window" => self.split_window(req),
            "select-pane" => self.select_pane(req),
            "kill-pane" => self.kill_pane(req),
            "kill-window" => self.kill_window(req),
            "kill-session" => self.kill_session(req),
            "rename-window" => self.rename_window(req),
            "rename-session" => self.rename_session(req),
            "send-keys" => self.send_keys(req),
            "list-sessions" => self.list_sessions(req),
            "list-windows" => self.list_windows(req),
            "list-panes" => self.list_panes(req),
            "resize-pane" => self.resize_pane(req),
            "display-message" => self.display_message(req),
            "set-environment" => self.set_environment(req),
            "show-environment" => self.show_environment(req),
            "set-option" => self.set_option(req),
            "show-options" => self.show_options(req),
            "switch-client" => self.switch_client(req),
            "attach-session" => self.attach_session(req),
            "detach-client" => self.detach_client(req),
            "has-session" => self.has_session(req),
            _ => Err(AppError::unsupported(format!("unknown command '{}'", req.command))),
        };
        match outcome {
            Ok((text, events)) => (CommandResponse::ok(text), events),
            Err(err) => (CommandResponse::from_err(err), Vec::new()),
        }
    }

    fn caller_pane(&self, req: &CommandRequest) -> Option<PaneId> {
        req.caller_pane_id.map(PaneId)
    }

    fn new_session(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let name = req
            .flags
            .get("session_name")
            .cloned()
            .ok_or_else(|| AppError::invalid_argument("missing session name"))?;
        let root_path = req
            .flags
            .get("c")
            .cloned()
            .ok_or_else(|| AppError::invalid_argument("missing working directory"))?;
        let width: u16 = req.flags.get("width").and_then(|s| s.parse().ok()).unwrap_or(80);
        let height: u16 = req.flags.get("height").and_then(|s| s.parse().ok()).unwrap_or(24);

        let snap = self.session_manager.create_session(
            &name,
            &root_path,
            width,
            height,
            false,
            false,
            false,
            req.env.clone(),
        )?;
        Ok((format!("{}", snap.name), vec![EventKind::SessionCreated]))
    }

    /// Creates a **new session**, not a window in the target session (spec
    /// §4.4 *new-window*, §9 design note).
    fn new_window(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let parent_name = &req.target;
        let parent_id = self.session_manager.session_id_by_name(parent_name)?;
        let name = req
            .flags
            .get("n")
            .cloned()
            .ok_or_else(|| AppError::invalid_argument("missing -n"))?;
        let root_path = req.flags.get("c").cloned().unwrap_or_else(|| "/".to_string());

        let snap = self
            .session_manager
            .create_session_inheriting(parent_id, &name, &root_path, 80, 24)?;
        Ok((snap.name.clone(), vec![EventKind::SessionCreated]))
    }

    fn split_window(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let target_pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let session_snap = self
            .session_manager
            .snapshot()
            .sessions
            .into_iter()
            .find(|s| s.windows.iter().any(|w| w.panes.iter().any(|p| p.id == target_pane.id)))
            .ok_or_else(|| AppError::not_found("pane's session vanished"))?;

        let direction = if req.flags.contains_key("h") {
            SplitDirection::Horizontal
        } else {
            SplitDirection::Vertical
        };
        let ratio: f64 = req.flags.get("p").and_then(|s| s.parse().ok()).map(|p: f64| p / 100.0).unwrap_or(0.5);

        // Fall back to the session's effective work dir: Worktree path when
        // present, else RootPath (spec §4.4 *split-window*).
        let work_dir = req.flags.get("c").filter(|s| !s.is_empty()).cloned().unwrap_or_else(|| {
            session_snap
                .worktree
                .as_ref()
                .map(|w| w.path.clone())
                .unwrap_or_else(|| session_snap.root_path.clone())
        });

        let mut env = session_snap.env.clone();
        env.extend(target_pane.env.clone());
        env.extend(req.env.clone());

        let window_id = WindowId(session_snap.active_window_id);
        let session_id = SessionId(session_snap.id);

        let pane_id = self.session_manager.add_pane_to_window(
            session_id,
            window_id,
            direction,
            ratio,
            NewPaneSpec {
                work_dir: &work_dir,
                env,
                cols: target_pane.cols,
                rows: target_pane.rows,
            },
        )?;
        Ok((pane_id.id_string(), vec![EventKind::LayoutChanged]))
    }

    /// Plain `-t <target>` selects that pane directly; `-direction
    /// next|prev` walks from the target (or the caller's own pane, if no
    /// target was given) via `resolve_directional_pane` (spec §8 scenario 5).
    fn select_pane(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        if let Some(raw_direction) = req.flags.get("direction") {
            let direction = match raw_direction.as_str() {
                "next" => Direction::Next,
                "prev" => Direction::Prev,
                other => return Err(AppError::invalid_argument(format!("unknown direction '{other}'"))),
            };
            let pivot = if req.target.is_empty() {
                self.caller_pane(req)
                    .ok_or_else(|| AppError::invalid_argument("no target or caller pane to select from"))?
            } else {
                let pane = self.session_manager.resolve_target(&req.target, self.caller_pane(req))?;
                PaneId(pane.id)
            };
            let resolved = self.session_manager.resolve_directional_pane(pivot, direction)?;
            self.session_manager.set_active_pane(PaneId(resolved.id))?;
            return Ok((String::new(), vec![EventKind::ActiveSession]));
        }

        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        self.session_manager.set_active_pane(PaneId(pane.id))?;
        Ok((String::new(), vec![EventKind::ActiveSession]))
    }

    fn kill_pane(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let (outcome, terminal) = self.session_manager.remove_pane(PaneId(pane.id))?;
        terminal.close();
        let mut events = vec![EventKind::LayoutChanged];
        if outcome.empty_session {
            events.push(EventKind::SessionKilled);
        }
        Ok((String::new(), events))
    }

    fn kill_window(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let session_id = req
            .session_id
            .map(SessionId)
            .ok_or_else(|| AppError::invalid_argument("missing session_id"))?;
        let window_id = self.window_of_pane_best_effort(pane.id)?;
        let (outcome, terminals) = self.session_manager.remove_window_by_id(session_id, window_id)?;
        for t in terminals {
            t.close();
        }
        let mut events = vec![EventKind::LayoutChanged];
        if outcome.empty_session {
            events.push(EventKind::SessionKilled);
        }
        Ok((String::new(), events))
    }

    fn kill_session(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        let terminals = self.session_manager.remove_session(session_id)?;
        for t in terminals {
            t.close();
        }
        Ok((String::new(), vec![EventKind::SessionKilled]))
    }

    fn rename_window(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let window_id = self.window_of_pane_best_effort(pane.id)?;
        let new_name = req.args.first().cloned().ok_or_else(|| AppError::invalid_argument("missing new name"))?;
        self.session_manager.rename_window(window_id, &new_name)?;
        Ok((String::new(), vec![EventKind::LayoutChanged]))
    }

    fn rename_session(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        let new_name = req.args.first().cloned().ok_or_else(|| AppError::invalid_argument("missing new name"))?;
        self.session_manager.rename_session(session_id, &new_name)?;
        Ok((String::new(), vec![EventKind::ActiveSession]))
    }

    /// *send-keys* (spec §4.4): empty payload or Terminal-less pane is a
    /// silent no-op.
    fn send_keys(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        if req.args.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let terminal = self.session_manager.get_pane_terminal(PaneId(pane.id))?;
        let mut bytes = Vec::new();
        for token in &req.args {
            bytes.extend(translate_key_token(token));
        }
        if bytes.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        // Fire-and-forget: a write failure to a detached pane is logged,
        // not propagated (spec §4.4 "Failure semantics").
        if let Err(e) = terminal.write(&bytes) {
            log::debug!("send-keys write failed for pane {}: {e}", pane.id_string);
        }
        Ok((String::new(), Vec::new()))
    }

    fn list_sessions(&self, _req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let snapshot = self.session_manager.snapshot();
        let text = snapshot
            .sessions
            .iter()
            .map(|s| format!("{}: {} windows", s.name, s.windows.len()))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((text, Vec::new()))
    }

    fn list_windows(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        let windows = self.session_manager.list_windows(session_id)?;
        let text = windows
            .iter()
            .map(|w| format!("{}: {} [{} panes]", w.index, w.name, w.panes.len()))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((text, Vec::new()))
    }

    fn list_panes(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let panes = self.session_manager.list_panes_by_window_target(&req.target)?;
        let fmt = req.flags.get("F").cloned().unwrap_or_else(|| "#{pane_id}".to_string());
        let session_name = req.target.split(':').next().unwrap_or_default();
        let text = panes
            .iter()
            .map(|p| expand_format(&fmt, p, session_name))
            .collect::<Vec<_>>()
            .join("\n");
        Ok((text, Vec::new()))
    }

    fn resize_pane(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let cols: u16 = req.flags.get("x").and_then(|s| s.parse().ok()).unwrap_or(pane.cols);
        let rows: u16 = req.flags.get("y").and_then(|s| s.parse().ok()).unwrap_or(pane.rows);
        self.session_manager.resize_pane(PaneId(pane.id), cols, rows)?;
        Ok((String::new(), vec![EventKind::LayoutChanged]))
    }

    fn display_message(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let pane = self
            .session_manager
            .resolve_target(&req.target, self.caller_pane(req))?;
        let fmt = req.args.first().cloned().unwrap_or_else(|| "#{session_name}".to_string());
        let session_name = req.target.split(':').next().unwrap_or_default();
        Ok((expand_format(&fmt, &pane, session_name), Vec::new()))
    }

    fn set_environment(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        let key = req.args.first().cloned().ok_or_else(|| AppError::invalid_argument("missing key"))?;
        let value = req.args.get(1).cloned().unwrap_or_default();
        self.session_manager.set_environment(session_id, &key, &value)?;
        Ok((String::new(), Vec::new()))
    }

    fn show_environment(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        let env = self.session_manager.show_environment(session_id)?;
        let mut lines: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        lines.sort();
        Ok((lines.join("\n"), Vec::new()))
    }

    /// `set-option [-g] name value` (spec §4.4, §6). `-g` writes the global
    /// table; otherwise the option is scoped to the target session.
    fn set_option(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let key = req.args.first().cloned().ok_or_else(|| AppError::invalid_argument("missing option name"))?;
        let value = req.args.get(1).cloned().unwrap_or_default();
        let session_id = if req.flags.contains_key("g") {
            None
        } else {
            Some(self.session_manager.session_id_by_name(&req.target)?.0)
        };
        self.options.lock().unwrap().set(session_id, key, value);
        Ok((String::new(), Vec::new()))
    }

    /// `show-options [-g]`: global scope shows only global options; session
    /// scope merges global with that session's overrides.
    fn show_options(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = if req.flags.contains_key("g") {
            None
        } else {
            Some(self.session_manager.session_id_by_name(&req.target)?.0)
        };
        let options = self.options.lock().unwrap().show(session_id);
        let mut lines: Vec<String> = options.iter().map(|(k, v)| format!("{k} {v}")).collect();
        lines.sort();
        Ok((lines.join("\n"), Vec::new()))
    }

    /// `switch-client -t <session>` (spec §4.4 session lifecycle): treated
    /// identically to `attach-session` since this engine has no separate
    /// notion of a connected client to switch between sessions on -- both
    /// just move the named session to `attached` and make it the
    /// last-active one.
    fn switch_client(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        self.session_manager.attach_session(session_id)?;
        Ok((String::new(), vec![EventKind::ActiveSession]))
    }

    /// `attach-session -t <session>` (spec §4.4 "attached" transition,
    /// "active-session on re-attach").
    fn attach_session(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        self.session_manager.attach_session(session_id)?;
        Ok((String::new(), vec![EventKind::ActiveSession]))
    }

    /// `detach-client -t <session>` (spec §4.4 "detached" transition,
    /// session preserved). No emission is defined for this transition in
    /// spec §4.4's emission table, unlike session-created/active-session/
    /// session-killed.
    fn detach_client(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        let session_id = self.session_manager.session_id_by_name(&req.target)?;
        self.session_manager.detach_session(session_id)?;
        Ok((String::new(), Vec::new()))
    }

    fn has_session(&self, req: &CommandRequest) -> Result<(String, Vec<EventKind>), AppError> {
        match self.session_manager.session_id_by_name(&req.target) {
            Ok(_) => Ok((String::new(), Vec::new())),
            Err(e) => Err(e),
        }
    }

    fn window_of_pane_best_effort(&self, pane_id: u32) -> Result<WindowId, AppError> {
        let snapshot = self.session_manager.snapshot();
        for session in &snapshot.sessions {
            for window in &session.windows {
                if window.panes.iter().any(|p| p.id == pane_id) {
                    return Ok(WindowId(window.id));
                }
            }
        }
        Err(AppError::not_found("no window owns that pane"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::FakeTerminal;

    struct FakeSpawner;
    impl super::super::session_manager::PaneSpawner for FakeSpawner {
        fn spawn(
            &self,
            _label: &str,
            _cwd: &str,
            _env: &HashMap<String, String>,
            _cols: u16,
            _rows: u16,
        ) -> Result<super::super::terminal::TerminalHandle, super::super::terminal::TerminalError> {
            Ok(FakeTerminal::new())
        }
    }

    fn router() -> CommandRouter {
        let manager = Arc::new(SessionManager::new(Arc::new(FakeSpawner)));
        CommandRouter::new(manager)
    }

    fn req(command: &str, target: &str) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn new_session_then_list_sessions_reports_it() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        let (response, events) = router.handle(create).await;
        assert!(response.success, "{:?}", response);
        assert!(events.contains(&EventKind::SessionCreated));

        let (listed, _) = router.handle(req("list-sessions", "")).await;
        assert!(listed.text.contains("demo"));
    }

    #[tokio::test]
    async fn select_pane_direction_next_wraps_to_first_pane() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;

        let mut split = req("split-window", "demo:0");
        split.flags.insert("c".to_string(), "/tmp".to_string());
        let (_, events) = router.handle(split).await;
        assert!(events.contains(&EventKind::LayoutChanged));

        let panes = router.session_manager.list_panes_by_window_target("demo:0").unwrap();
        assert_eq!(panes.len(), 2);
        let first_pane_id = panes[0].id;

        let mut select = req("select-pane", "demo:0");
        select.flags.insert("direction".to_string(), "next".to_string());
        select.caller_pane_id = Some(panes[1].id);
        let (response, events) = router.handle(select).await;
        assert!(response.success, "{:?}", response);
        assert!(events.contains(&EventKind::ActiveSession));

        let snap = router.session_manager.snapshot();
        let window = &snap.sessions[0].windows[0];
        let active_pane = &window.panes[window.active_pane_index];
        assert_eq!(active_pane.id, first_pane_id);
    }

    #[tokio::test]
    async fn set_option_is_session_scoped_by_default() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;

        let mut set = req("set-option", "demo");
        set.args = vec!["mouse".to_string(), "on".to_string()];
        let (response, _) = router.handle(set).await;
        assert!(response.success, "{:?}", response);

        let (shown, _) = router.handle(req("show-options", "demo")).await;
        assert_eq!(shown.text, "mouse on");
    }

    #[tokio::test]
    async fn show_options_global_excludes_session_scoped_entries() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;

        let mut set = req("set-option", "demo");
        set.args = vec!["mouse".to_string(), "on".to_string()];
        router.handle(set).await;

        let mut global_set = req("set-option", "demo");
        global_set.flags.insert("g".to_string(), "true".to_string());
        global_set.args = vec!["prefix".to_string(), "C-a".to_string()];
        router.handle(global_set).await;

        let mut show_global = req("show-options", "demo");
        show_global.flags.insert("g".to_string(), "true".to_string());
        let (shown, _) = router.handle(show_global).await;
        assert_eq!(shown.text, "prefix C-a");
    }

    #[tokio::test]
    async fn detach_then_attach_session_round_trips_status() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;

        let (detach_resp, detach_events) = router.handle(req("detach-client", "demo")).await;
        assert!(detach_resp.success, "{:?}", detach_resp);
        assert!(detach_events.is_empty());

        let snap = router.session_manager.snapshot();
        assert_eq!(snap.sessions[0].status, crate::core::model::SessionStatus::Detached);

        let (attach_resp, attach_events) = router.handle(req("attach-session", "demo")).await;
        assert!(attach_resp.success, "{:?}", attach_resp);
        assert!(attach_events.contains(&EventKind::ActiveSession));

        let snap = router.session_manager.snapshot();
        assert_eq!(snap.sessions[0].status, crate::core::model::SessionStatus::Attached);
    }

    #[tokio::test]
    async fn switch_client_reattaches_a_detached_session() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;
        router.handle(req("detach-client", "demo")).await;

        let (response, events) = router.handle(req("switch-client", "demo")).await;
        assert!(response.success, "{:?}", response);
        assert!(events.contains(&EventKind::ActiveSession));
        let snap = router.session_manager.snapshot();
        assert_eq!(snap.sessions[0].status, crate::core::model::SessionStatus::Attached);
    }

    #[tokio::test]
    async fn select_pane_unknown_direction_is_invalid_argument() {
        let router = router();
        let mut create = req("new-session", "");
        create.flags.insert("session_name".to_string(), "demo".to_string());
        create.flags.insert("c".to_string(), "/tmp".to_string());
        router.handle(create).await;

        let mut select = req("select-pane", "demo:0");
        select.flags.insert("direction".to_string(), "sideways".to_string());
        let (response, _) = router.handle(select).await;
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::InvalidArgument));
    }
}

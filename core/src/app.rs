//! Process-wide wiring (spec §9 "Global mutable state"): one `App` owns
//! every long-lived component, is constructed once at startup, and is
//! passed explicitly to whatever drives it (`main.rs`'s signal-wait loop
//! today; a GUI shell's managed state in the teacher's world). No
//! process-wide singleton / `lazy_static` exists anywhere in this crate.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::control::ControlPort;
use crate::core::config::{AppConfig, ConfigStore};
use crate::core::delta::DeltaEngine;
use crate::core::error::AppError;
use crate::core::events::EventKind;
use crate::core::flush::OutputFlushManager;
use crate::core::input_buffer::InputLineBuffer;
use crate::core::logs::{ErrorLog, InputHistoryLog};
use crate::core::model::PaneId;
use crate::core::router::{CommandRequest, CommandResponse, CommandRouter};
use crate::core::session_manager::{RealPaneSpawner, SessionManager};
use crate::core::terminal::ExitReason;
use crate::core::transport::Transport;

const ERROR_LOG_CAPACITY: usize = 500;
const INPUT_HISTORY_CAPACITY: usize = 2000;

pub struct App {
    pub session_manager: Arc<SessionManager>,
    pub router: Arc<CommandRouter>,
    pub delta_engine: Arc<DeltaEngine>,
    pub flush_manager: Arc<OutputFlushManager>,
    pub config_store: ConfigStore,
    pub config: tokio::sync::RwLock<AppConfig>,
    pub error_log: Arc<ErrorLog>,
    pub input_history_log: Arc<InputHistoryLog>,
    input_buffer: Mutex<InputLineBuffer>,
    wired_panes: Mutex<HashSet<u32>>,
    transport: Mutex<Option<Transport>>,
    control_port: Mutex<Option<ControlPort>>,
}

impl App {
    /// Builds every component and starts the Transport listener. A config
    /// load failure falls back to defaults rather than aborting startup
    /// (spec §4.3 event table: `config:load-failed` does not trigger a
    /// snapshot, it's purely informational).
    pub async fn bootstrap() -> Result<Arc<Self>, AppError> {
        let config_store = ConfigStore::new(ConfigStore::default_path());
        let config = match config_store.load() {
            Ok(config) => config,
            Err(err) => {
                log::warn!("config load failed, using defaults: {err}");
                AppConfig::default()
            }
        };

        let data_dir = config_store
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(std::env::temp_dir);

        let run_stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let pid = std::process::id();
        let error_log = Arc::new(
            ErrorLog::open(
                &data_dir.join("session-logs").join(format!("session-{run_stamp}-{pid}.jsonl")),
                ERROR_LOG_CAPACITY,
                ErrorLog::KEEP_FILES,
            )
            .await?,
        );
        let input_history_log = Arc::new(
            InputHistoryLog::open(
                &data_dir.join("input-history").join(format!("input-{run_stamp}-{pid}.jsonl")),
                INPUT_HISTORY_CAPACITY,
                InputHistoryLog::KEEP_FILES,
            )
            .await?,
        );

        let session_manager = Arc::new(SessionManager::new(Arc::new(RealPaneSpawner)));
        let router = Arc::new(CommandRouter::new(session_manager.clone()));
        let (delta_engine, emission_rx) = DeltaEngine::new(session_manager.clone());
        let (flush_manager, frame_rx) = OutputFlushManager::new(session_manager.clone());

        let transport = Transport::start(
            session_manager.clone(),
            delta_engine.clone(),
            router.clone(),
            frame_rx,
            emission_rx,
        )
        .await;
        if transport.is_none() {
            log::error!("transport failed to bind any port in 9900..=9999");
        }

        let app = Arc::new(App {
            session_manager,
            router,
            delta_engine,
            flush_manager,
            config_store,
            config: tokio::sync::RwLock::new(config),
            error_log,
            input_history_log,
            input_buffer: Mutex::new(InputLineBuffer::new()),
            wired_panes: Mutex::new(HashSet::new()),
            transport: Mutex::new(transport),
            control_port: Mutex::new(None),
        });

        let port_file = data_dir.join("control-port");
        let control_port = ControlPort::start(app.clone(), Some(port_file)).await;
        if control_port.is_none() {
            log::error!("control port failed to bind any port in {:?}", crate::control::CONTROL_PORT_RANGE);
        }
        *app.control_port.lock().await = control_port;

        Ok(app)
    }

    /// Single entry point for command execution (spec §4.4), wrapping the
    /// Command Router with the side effects a bare dispatch doesn't know
    /// about: wiring a freshly spawned pane's PTY callbacks into the Output
    /// Flush Manager, feeding `send-keys` payloads into the Input Line
    /// Buffer, and requesting a delta emission for whatever events fired.
    pub async fn handle_command(self: &Arc<Self>, req: CommandRequest) -> CommandResponse {
        let is_send_keys = req.command == "send-keys";
        let target_for_history = req.target.clone();
        let caller_pane = req.caller_pane_id;
        let args_for_history = req.args.clone();

        let (response, events) = self.router.handle(req).await;

        self.wire_new_panes().await;

        if is_send_keys && !args_for_history.is_empty() {
            if let Ok(pane) = self.session_manager.resolve_target(&target_for_history, caller_pane.map(PaneId)) {
                self.record_input_history(PaneId(pane.id), &args_for_history.join(" ")).await;
            }
        }

        for event in events {
            self.delta_engine.request(event).await;
        }

        response
    }

    /// Diffs the live pane set against previously-wired panes and attaches
    /// `on_output`/`on_exit` callbacks to every new one. Output bytes are
    /// handed to the Output Flush Manager; an exit logs and requests a
    /// layout-changed emission (the pane itself is not removed here -- the
    /// Session Manager only removes panes via an explicit `kill-pane`).
    async fn wire_new_panes(self: &Arc<Self>) {
        let snapshot = self.session_manager.snapshot();
        let live_pane_ids: Vec<u32> = snapshot
            .sessions
            .iter()
            .flat_map(|s| s.windows.iter())
            .flat_map(|w| w.panes.iter())
            .map(|p| p.id)
            .collect();

        let mut wired = self.wired_panes.lock().await;
        for pane_id in live_pane_ids {
            if wired.contains(&pane_id) {
                continue;
            }
            let Ok(terminal) = self.session_manager.get_pane_terminal(PaneId(pane_id)) else {
                continue;
            };

            let flush_manager = self.flush_manager.clone();
            let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
            tokio::spawn(async move {
                while let Some(bytes) = order_rx.recv().await {
                    flush_manager.push(PaneId(pane_id), &bytes).await;
                }
            });
            terminal.on_output(Box::new(move |bytes: &[u8]| {
                // Sent inline on the PTY dispatch task so per-pane ordering
                // (spec §5 "PTY-emission order") is preserved; the receiver
                // above is the only task that ever calls `push` for this pane.
                let _ = order_tx.send(bytes.to_vec());
            }));

            let app = self.clone();
            terminal.on_exit(Box::new(move |reason: ExitReason| {
                let app = app.clone();
                tokio::spawn(async move {
                    log::info!("pane {} exited: {:?}", pane_id, reason);
                    let _ = app
                        .error_log
                        .log_error("pane-exit", format!("pane {pane_id} exited: {reason:?}"))
                        .await;
                    app.delta_engine.request(EventKind::LayoutChanged).await;
                });
            }));

            wired.insert(pane_id);
        }
    }

    async fn record_input_history(self: &Arc<Self>, pane_id: PaneId, raw: &str) {
        let flushed = {
            let mut buffer = self.input_buffer.lock().await;
            buffer.push(pane_id, raw)
        };
        for entry in flushed {
            let _ = self.input_history_log.log_input(entry.pane_id, entry.input).await;
            self.delta_engine.request(EventKind::AppInputHistoryUpdated).await;
        }
    }

    /// Forces a flush for any pane idle past the input buffer's inactivity
    /// timeout. Callers drive this on an interval (spec §4.7).
    pub async fn tick_input_buffer(self: &Arc<Self>) {
        let flushed = {
            let mut buffer = self.input_buffer.lock().await;
            buffer.tick()
        };
        for entry in flushed {
            let _ = self.input_history_log.log_input(entry.pane_id, entry.input).await;
            self.delta_engine.request(EventKind::AppInputHistoryUpdated).await;
        }
    }

    pub async fn save_config(self: &Arc<Self>, config: AppConfig) -> Result<(), AppError> {
        self.config_store.save(&config)?;
        *self.config.write().await = config;
        self.delta_engine.request(EventKind::AppConfigUpdated).await;
        Ok(())
    }

    /// Shutdown cascade (spec §9): Transport stop, Output Flush Manager
    /// drain, Session Manager close (closes every Terminal), logs close.
    /// Each stage completes before the next begins.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut control_port = self.control_port.lock().await;
            *control_port = None;
        }
        {
            let mut transport = self.transport.lock().await;
            *transport = None;
        }

        let drained_panes: Vec<u32> = {
            let wired = self.wired_panes.lock().await;
            wired.iter().copied().collect()
        };
        for pane_id in drained_panes {
            self.flush_manager.drain_pane(PaneId(pane_id)).await;
        }

        {
            let mut buffer = self.input_buffer.lock().await;
            let flushed = buffer.drain_all();
            drop(buffer);
            for entry in flushed {
                let _ = self.input_history_log.log_input(entry.pane_id, entry.input).await;
            }
        }

        let snapshot = self.session_manager.snapshot();
        for session in &snapshot.sessions {
            if let Ok(terminals) = self.session_manager.remove_session(crate::core::model::SessionId(session.id)) {
                for terminal in terminals {
                    terminal.close();
                }
            }
        }

        log::info!("app shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_succeeds_against_a_temp_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let app = App::bootstrap().await;
        assert!(app.is_ok());
        if let Ok(app) = app {
            app.shutdown().await;
        }
    }

    #[tokio::test]
    async fn handle_command_wires_new_session_pane_into_flush_manager() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let app = App::bootstrap().await.unwrap();

        let mut flags = std::collections::HashMap::new();
        flags.insert("session_name".to_string(), "demo".to_string());
        flags.insert("c".to_string(), dir.path().to_string_lossy().to_string());
        let req = CommandRequest {
            command: "new-session".to_string(),
            flags,
            ..Default::default()
        };
        let response = app.handle_command(req).await;
        assert!(response.success, "{:?}", response);

        let wired = app.wired_panes.lock().await;
        assert_eq!(wired.len(), 1);
        drop(wired);
        app.shutdown().await;
    }
}

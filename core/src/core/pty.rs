//! Real PTY-backed [`Terminal`] implementation.
//!
//! Grounded on the teacher's `xterm_backend.rs`/`process_manager.rs`: a
//! dedicated OS reader thread drains `portable_pty`'s blocking reader into a
//! bounded channel, and a tokio task drains that channel to invoke the
//! registered output callback. The UTF-8-aware decoder from the teacher is
//! dropped here — downstream consumers (Output Flush Manager) want raw
//! bytes, not text, so no decoding happens in this layer.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::Notify;

use super::terminal::{ExitCallback, ExitReason, OutputCallback, Terminal, TerminalError};

#[cfg(unix)]
use libc;

/// Bounded channel capacity between the OS reader thread and the tokio
/// dispatch task; same sizing rationale as the teacher (256 * 4KiB ~= 1MiB
/// of slack before a slow consumer causes drops).
const READER_CHANNEL_CAPACITY: usize = 256;

struct Session {
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    child_pid: i32,
    #[cfg(unix)]
    pgid: i32,
    shutdown: Arc<Notify>,
    reader_handle: Option<JoinHandle<()>>,
}

/// One spawned shell, owned exclusively by its Pane (spec §3 "Ownership").
pub struct PtyTerminal {
    session: Mutex<Option<Session>>,
    output_cb: Mutex<Option<OutputCallback>>,
    exit_cb: Mutex<Option<ExitCallback>>,
    closed: AtomicBool,
}

impl PtyTerminal {
    /// Spawns a login shell in a new PTY. `label` is used only in thread
    /// names and log lines (typically the pane's `IDString`).
    pub fn spawn(
        label: &str,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<Self>, TerminalError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("openpty: {e}")))?;

        #[cfg(unix)]
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        #[cfg(windows)]
        let shell = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());

        let mut cmd = CommandBuilder::new(&shell);
        #[cfg(unix)]
        cmd.arg("-l");

        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::SpawnFailed(format!("spawn shell: {e}")))?;

        let child_pid = child
            .process_id()
            .map(|p| p as i32)
            .ok_or_else(|| TerminalError::SpawnFailed("could not obtain child pid".into()))?;

        #[cfg(unix)]
        let pgid = pair.master.process_group_leader().unwrap_or(child_pid);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::SpawnFailed(format!("take writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::SpawnFailed(format!("clone reader: {e}")))?;

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(READER_CHANNEL_CAPACITY);

        let thread_label = label.to_string();
        let reader_handle = std::thread::Builder::new()
            .name(format!("pty-reader-{thread_label}"))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.blocking_send(buf[..n].to_vec()).is_err() {
                                log::warn!(
                                    "pty reader {thread_label}: channel closed, dropping {n} bytes"
                                );
                                break;
                            }
                        }
                        Err(e) => {
                            #[cfg(unix)]
                            {
                                let raw = e.raw_os_error().unwrap_or(0);
                                if raw == libc::EAGAIN || raw == libc::EINTR {
                                    continue;
                                }
                            }
                            log::debug!("pty reader {thread_label} error: {e}");
                            break;
                        }
                    }
                }
                log::debug!("pty reader {thread_label} exited");
            })
            .map_err(|e| TerminalError::SpawnFailed(format!("spawn reader thread: {e}")))?;

        drop(pair.slave);

        let term = Arc::new(Self {
            session: Mutex::new(Some(Session {
                writer,
                master: pair.master,
                child_pid,
                #[cfg(unix)]
                pgid,
                shutdown,
                reader_handle: Some(reader_handle),
            })),
            output_cb: Mutex::new(None),
            exit_cb: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let dispatch_term = term.clone();
        let event_label = label.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = rx.recv() => {
                        match data {
                            Some(bytes) => {
                                let guard = dispatch_term.output_cb.lock().unwrap();
                                if let Some(cb) = guard.as_ref() {
                                    cb(&bytes);
                                }
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_clone.notified() => break,
                }
            }
            log::debug!("pty dispatch {event_label} exited");
            dispatch_term.fire_exit(ExitReason::Exited(None));
        });

        log::info!("spawned pty for pane {label} (pid={child_pid}, shell={shell})");
        Ok(term)
    }

    fn fire_exit(&self, reason: ExitReason) {
        if let Some(cb) = self.exit_cb.lock().unwrap().take() {
            cb(reason);
        }
    }
}

impl Terminal for PtyTerminal {
    fn write(&self, bytes: &[u8]) -> Result<(), TerminalError> {
        let mut guard = self.session.lock().unwrap();
        let session = guard.as_mut().ok_or(TerminalError::Closed)?;
        session
            .writer
            .write_all(bytes)
            .map_err(|e| TerminalError::WriteFailed(e.to_string()))?;
        session
            .writer
            .flush()
            .map_err(|e| TerminalError::WriteFailed(e.to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let guard = self.session.lock().unwrap();
        let session = guard.as_ref().ok_or(TerminalError::Closed)?;
        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::ResizeFailed(e.to_string()))
    }

    fn on_output(&self, callback: OutputCallback) {
        *self.output_cb.lock().unwrap() = Some(callback);
    }

    fn on_exit(&self, callback: ExitCallback) {
        *self.exit_cb.lock().unwrap() = Some(callback);
    }

    /// Idempotent: sends SIGTERM to the process group, escalates to SIGKILL
    /// after a grace period, then drops the writer/master (EOFing the
    /// reader thread) and joins it. Mirrors the teacher's `kill_session`.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let session = match self.session.lock().unwrap().take() {
            Some(s) => s,
            None => return,
        };

        #[cfg(unix)]
        {
            let pgid = session.pgid;
            let pid = session.child_pid;
            unsafe { libc::kill(-pgid, libc::SIGTERM) };
            std::thread::sleep(std::time::Duration::from_millis(100));
            let alive = unsafe { libc::kill(pid, 0) } == 0;
            if alive {
                unsafe { libc::kill(-pgid, libc::SIGKILL) };
            }
        }
        #[cfg(windows)]
        {
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &session.child_pid.to_string(), "/T", "/F"])
                .output();
        }

        session.shutdown.notify_one();
        drop(session.writer);
        drop(session.master);
        if let Some(handle) = session.reader_handle {
            let _ = handle.join();
        }
        self.fire_exit(ExitReason::ClosedByHost);
    }
}

impl Drop for PtyTerminal {
    fn drop(&mut self) {
        self.close();
    }
}

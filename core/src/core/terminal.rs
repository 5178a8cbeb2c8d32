//! The PTY Adapter capability (spec §4.1, design note §9 "dynamic dispatch
//! for Terminal").
//!
//! The PTY is modeled as a narrow trait rather than a concrete type, the
//! same shape as the teacher's `TerminalBackend` (`core/terminal_backend.rs`):
//! a handful of methods, `Send + Sync`, stored behind a trait object inside
//! a `Pane`. Real panes use [`crate::core::pty::PtyTerminal`]; tests use
//! [`FakeTerminal`].

use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors specific to terminal/PTY operations, kept separate from
/// [`crate::core::error::AppError`] so PTY-level detail survives until the
/// Session Manager boundary converts it (see the `From` impl there).
#[derive(Debug, Clone, Error)]
pub enum TerminalError {
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("resize failed: {0}")]
    ResizeFailed(String),
    #[error("terminal already closed")]
    Closed,
}

/// Why a pane's shell process ended.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The shell exited normally (or was killed) with this status code, if known.
    Exited(Option<i32>),
    /// The PTY was closed by `close()` before the shell reported an exit.
    ClosedByHost,
}

pub type OutputCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type ExitCallback = Box<dyn FnOnce(ExitReason) + Send>;

/// Capability exposed to the core (spec §4.1).
///
/// Implementations must deliver `on_output` chunks in emission order for a
/// given pane, and must call `on_exit`'s callback exactly once. `close` is
/// idempotent. None of these methods may block the Session Manager's lock:
/// callers always invoke them outside any engine lock (spec §5).
pub trait Terminal: Send + Sync {
    fn write(&self, bytes: &[u8]) -> Result<(), TerminalError>;
    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError>;
    fn on_output(&self, callback: OutputCallback);
    fn on_exit(&self, callback: ExitCallback);
    fn close(&self);
}

/// A boxed, thread-safe handle to a pane's PTY. This is what `Pane` stores;
/// it owns the capability exclusively (spec §3 "Ownership").
pub type TerminalHandle = Arc<dyn Terminal>;

/// In-memory fake used by Session Manager / Router / Flush Manager tests so
/// no real shell is spawned. Captures writes and resizes, and lets tests
/// feed synthetic output/exit events.
#[derive(Default)]
pub struct FakeTerminal {
    inner: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    writes: Vec<Vec<u8>>,
    resizes: Vec<(u16, u16)>,
    closed: bool,
    output_cb: Option<OutputCallback>,
    exit_cb: Option<ExitCallback>,
}

impl FakeTerminal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Test helper: simulate the shell producing output.
    pub fn emit_output(&self, bytes: &[u8]) {
        let guard = self.inner.lock().unwrap();
        if let Some(cb) = guard.output_cb.as_ref() {
            cb(bytes);
        }
    }

    /// Test helper: simulate the shell exiting.
    pub fn emit_exit(&self, reason: ExitReason) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(cb) = guard.exit_cb.take() {
            cb(reason);
        }
    }
}

impl Terminal for FakeTerminal {
    fn write(&self, bytes: &[u8]) -> Result<(), TerminalError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return Err(TerminalError::Closed);
        }
        guard.writes.push(bytes.to_vec());
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return Err(TerminalError::Closed);
        }
        guard.resizes.push((cols, rows));
        Ok(())
    }

    fn on_output(&self, callback: OutputCallback) {
        self.inner.lock().unwrap().output_cb = Some(callback);
    }

    fn on_exit(&self, callback: ExitCallback) {
        self.inner.lock().unwrap().exit_cb = Some(callback);
    }

    fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

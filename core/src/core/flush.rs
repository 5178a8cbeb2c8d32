//! Output Flush Manager (spec §4.5): one scheduler batching every pane's
//! PTY output into coalesced binary frames, replacing a naive per-pane
//! timer design.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;

use super::model::PaneId;
use super::session_manager::SessionManager;

pub const TICK_INTERVAL: Duration = Duration::from_millis(16);
pub const SIZE_THRESHOLD: usize = 32 * 1024;
pub const TIME_THRESHOLD: Duration = Duration::from_millis(16);
pub const MAX_STARVE: Duration = Duration::from_millis(250);

/// One outgoing frame, matching the wire layout in spec §6 minus the
/// length-prefix framing (added by the Transport at send time).
#[derive(Debug, Clone)]
pub struct Frame {
    pub pane_id: u32,
    pub sequence: u32,
    pub dropped: bool,
    pub bytes: Vec<u8>,
}

struct PaneBuffer {
    bytes: Vec<u8>,
    last_flush: Instant,
    sequence: u32,
    dropped_since_last_frame: bool,
}

impl PaneBuffer {
    fn new() -> Self {
        PaneBuffer {
            bytes: Vec::new(),
            last_flush: Instant::now(),
            sequence: 0,
            dropped_since_last_frame: false,
        }
    }

    fn should_flush(&self) -> bool {
        !self.bytes.is_empty()
            && (self.bytes.len() >= SIZE_THRESHOLD || self.last_flush.elapsed() >= TIME_THRESHOLD)
    }

    fn take_frame(&mut self, pane_id: PaneId) -> Frame {
        self.sequence += 1;
        self.last_flush = Instant::now();
        let dropped = self.dropped_since_last_frame;
        self.dropped_since_last_frame = false;
        Frame {
            pane_id: pane_id.0,
            sequence: self.sequence,
            dropped,
            bytes: std::mem::take(&mut self.bytes),
        }
    }
}

/// Backpressure budget per pane: beyond this the manager drops the oldest
/// bytes, never the newest (spec §4.5 "Backpressure").
const MAX_BUFFERED_BYTES: usize = 8 * SIZE_THRESHOLD;

struct State {
    buffers: HashMap<PaneId, PaneBuffer>,
}

/// Single long-lived scheduler (spec §4.5). Owns one ticker; stops it when
/// no pane has pending bytes and restarts on the next write (spec §4.5
/// "Adaptive behavior").
pub struct OutputFlushManager {
    state: Mutex<State>,
    frame_tx: mpsc::UnboundedSender<Frame>,
    session_manager: Arc<SessionManager>,
    ticking: std::sync::atomic::AtomicBool,
}

impl OutputFlushManager {
    pub fn new(session_manager: Arc<SessionManager>) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(OutputFlushManager {
            state: Mutex::new(State {
                buffers: HashMap::new(),
            }),
            frame_tx,
            session_manager,
            ticking: std::sync::atomic::AtomicBool::new(false),
        });
        (manager, frame_rx)
    }

    /// Appends bytes from a pane's PTY `on_output` callback. Starts the
    /// ticker if it was stopped.
    pub async fn push(self: &Arc<Self>, pane_id: PaneId, bytes: &[u8]) {
        {
            let mut state = self.state.lock().await;
            let buf = state.buffers.entry(pane_id).or_insert_with(PaneBuffer::new);
            buf.bytes.extend_from_slice(bytes);
            if buf.bytes.len() > MAX_BUFFERED_BYTES {
                let overflow = buf.bytes.len() - MAX_BUFFERED_BYTES;
                buf.bytes.drain(0..overflow);
                buf.dropped_since_last_frame = true;
            }
        }
        self.ensure_ticking();
    }

    /// Drains a pane's buffer synchronously, used on pane close (spec §4.5
    /// "Drain").
    pub async fn drain_pane(&self, pane_id: PaneId) {
        let frame = {
            let mut state = self.state.lock().await;
            state.buffers.remove(&pane_id).filter(|b| !b.bytes.is_empty()).map(|mut b| b.take_frame(pane_id))
        };
        if let Some(frame) = frame {
            let _ = self.frame_tx.send(frame);
        }
    }

    fn ensure_ticking(self: &Arc<Self>) {
        use std::sync::atomic::Ordering;
        if self.ticking.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_ticker().await;
        });
    }

    async fn run_ticker(self: Arc<Self>) {
        use std::sync::atomic::Ordering;
        let mut ticker = interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            let (frames, active_panes) = self.sweep().await;
            for frame in frames {
                let _ = self.frame_tx.send(frame);
            }
            if !active_panes.is_empty() {
                // Batch activity update in one call (spec §4.5).
                for pane_id in &active_panes {
                    let _ = self.session_manager.update_activity_by_pane_id(*pane_id);
                }
            }
            let empty = {
                let state = self.state.lock().await;
                state.buffers.values().all(|b| b.bytes.is_empty())
            };
            if empty {
                self.ticking.store(false, Ordering::Release);
                break;
            }
        }
    }

    async fn sweep(&self) -> (Vec<Frame>, Vec<PaneId>) {
        let mut state = self.state.lock().await;
        let mut frames = Vec::new();
        let mut active = Vec::new();
        for (pane_id, buf) in state.buffers.iter_mut() {
            if buf.should_flush() {
                frames.push(buf.take_frame(*pane_id));
                active.push(*pane_id);
            } else if !buf.bytes.is_empty() && buf.last_flush.elapsed() >= MAX_STARVE {
                frames.push(buf.take_frame(*pane_id));
                active.push(*pane_id);
            }
        }
        (frames, active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_flushes_past_size_threshold() {
        let mut buf = PaneBuffer::new();
        buf.bytes = vec![0u8; SIZE_THRESHOLD + 1];
        assert!(buf.should_flush());
    }

    #[test]
    fn empty_buffer_never_flushes() {
        let buf = PaneBuffer::new();
        assert!(!buf.should_flush());
    }

    #[test]
    fn take_frame_resets_buffer_and_increments_sequence() {
        let mut buf = PaneBuffer::new();
        buf.bytes = vec![1, 2, 3];
        let frame = buf.take_frame(PaneId(7));
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.bytes, vec![1, 2, 3]);
        assert!(buf.bytes.is_empty());
    }
}

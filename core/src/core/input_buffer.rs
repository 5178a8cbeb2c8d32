//! Input Line Buffer (spec §4.7): converts the keystroke stream into
//! command-granular history entries, stripping control sequences that
//! aren't part of the typed command.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::model::PaneId;

/// `input_history_max_input_len` (spec §4.7).
pub const MAX_INPUT_LEN: usize = 4000;
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedEntry {
    pub pane_id: u32,
    pub input: String,
}

struct PaneBuffer {
    runes: Vec<char>,
    last_touched: Instant,
}

impl PaneBuffer {
    fn new() -> Self {
        PaneBuffer {
            runes: Vec::new(),
            last_touched: Instant::now(),
        }
    }
}

/// Strips CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`) sequences
/// entirely before rune-by-rune scanning (spec §4.7 "preprocessing pass").
pub fn strip_control_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                for c2 in chars.by_ref() {
                    if ('@'..='~').contains(&c2) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                loop {
                    match chars.next() {
                        None => break,
                        Some('\u{07}') => break,
                        Some('\u{1b}') if chars.peek() == Some(&'\\') => {
                            chars.next();
                            break;
                        }
                        _ => continue,
                    }
                }
            }
            _ => {
                // A bare ESC not starting CSI/OSC: drop just the ESC byte.
            }
        }
    }
    out
}

/// Per-pane editing-aware accumulator (spec §4.7). Owns no timer task
/// itself; callers drive `tick()` on an interval (or call it inline after
/// each push) to discover panes whose inactivity timeout has elapsed.
pub struct InputLineBuffer {
    panes: HashMap<PaneId, PaneBuffer>,
}

impl InputLineBuffer {
    pub fn new() -> Self {
        InputLineBuffer { panes: HashMap::new() }
    }

    /// Feeds raw bytes typed into `pane_id`, returning zero or more
    /// completed history entries in emission order.
    pub fn push(&mut self, pane_id: PaneId, raw: &str) -> Vec<FlushedEntry> {
        let cleaned = strip_control_sequences(raw);
        let buf = self.panes.entry(pane_id).or_insert_with(PaneBuffer::new);
        buf.last_touched = Instant::now();
        let mut out = Vec::new();

        for c in cleaned.chars() {
            match c {
                '\r' => {
                    out.push(flush_buffer(buf, pane_id));
                }
                '\u{03}' => {
                    buf.runes.clear();
                    out.push(FlushedEntry {
                        pane_id: pane_id.0,
                        input: "^C".to_string(),
                    });
                }
                '\u{04}' => {
                    let text = if buf.runes.is_empty() {
                        "^D".to_string()
                    } else {
                        format!("{} (^D)", buf.runes.iter().collect::<String>())
                    };
                    buf.runes.clear();
                    out.push(FlushedEntry { pane_id: pane_id.0, input: text });
                }
                '\u{7f}' | '\u{08}' => {
                    buf.runes.pop();
                }
                '\n' | '\t' => {}
                c if (c as u32) < 0x20 => {}
                c => {
                    if buf.runes.len() < MAX_INPUT_LEN {
                        buf.runes.push(c);
                    }
                }
            }
        }
        out
    }

    /// Forces a flush for any pane idle past [`INACTIVITY_TIMEOUT`] with
    /// non-empty content but no trailing Enter (spec §4.7).
    pub fn tick(&mut self) -> Vec<FlushedEntry> {
        let stale: Vec<PaneId> = self
            .panes
            .iter()
            .filter(|(_, b)| !b.runes.is_empty() && b.last_touched.elapsed() >= INACTIVITY_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .map(|pane_id| {
                let buf = self.panes.get_mut(&pane_id).unwrap();
                flush_buffer(buf, pane_id)
            })
            .collect()
    }

    /// Drains every per-pane buffer on shutdown (spec §4.7).
    pub fn drain_all(&mut self) -> Vec<FlushedEntry> {
        let ids: Vec<PaneId> = self.panes.keys().copied().collect();
        ids.into_iter()
            .filter_map(|pane_id| {
                let buf = self.panes.get_mut(&pane_id).unwrap();
                if buf.runes.is_empty() {
                    None
                } else {
                    Some(flush_buffer(buf, pane_id))
                }
            })
            .collect()
    }
}

impl Default for InputLineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn flush_buffer(buf: &mut PaneBuffer, pane_id: PaneId) -> FlushedEntry {
    let input: String = buf.runes.drain(..).collect();
    FlushedEntry { pane_id: pane_id.0, input }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_granular_history_entry() {
        let mut buf = InputLineBuffer::new();
        let mut entries = Vec::new();
        for ch in ["c", "l", "a", "u", "d", "e", "\r"] {
            entries.extend(buf.push(PaneId(0), ch));
        }
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input, "claude");
    }

    #[test]
    fn bracketed_paste_markers_produce_zero_entries() {
        let mut buf = InputLineBuffer::new();
        let entries = buf.push(PaneId(0), "\u{1b}[I\u{1b}[O");
        assert!(entries.is_empty());
    }

    #[test]
    fn ctrl_c_flushes_synthetic_entry_and_clears() {
        let mut buf = InputLineBuffer::new();
        buf.push(PaneId(0), "abc");
        let entries = buf.push(PaneId(0), "\u{03}");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input, "^C");
        let entries = buf.push(PaneId(0), "\r");
        assert_eq!(entries[0].input, "");
    }

    #[test]
    fn backspace_removes_last_rune() {
        let mut buf = InputLineBuffer::new();
        buf.push(PaneId(0), "abc\u{7f}");
        let entries = buf.push(PaneId(0), "\r");
        assert_eq!(entries[0].input, "ab");
    }

    #[test]
    fn input_past_max_len_is_truncated() {
        let mut buf = InputLineBuffer::new();
        let long = "a".repeat(MAX_INPUT_LEN + 1);
        buf.push(PaneId(0), &long);
        let entries = buf.push(PaneId(0), "\r");
        assert_eq!(entries[0].input.chars().count(), MAX_INPUT_LEN);
    }
}

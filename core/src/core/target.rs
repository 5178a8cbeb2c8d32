//! Command target grammar (spec §6):
//!
//! ```text
//! target   := '' | '!' | '{last}' | pane_id | window_id | session_ref
//! pane_id  := '%' digit+
//! window_id:= '@' digit+
//! session_ref := name [ ':' win_index [ '.' pane_index ] ]
//! name     := any non-':' string
//! ```
//!
//! Grounded on the `resolve_pane_id`-style target parsing in the pack's
//! tmux-shim example: split on the fixed sigils first (`%`, `@`), then fall
//! back to the `name[:index[.index]]` triple.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Empty target: caller's own pane / current context.
    Current,
    /// `!` — the last-active entity relative to the caller.
    Bang,
    /// `{last}` — same meaning as `!`, alternate spelling.
    LastBraced,
    PaneId(u32),
    WindowId(u32),
    SessionRef {
        name: String,
        window_index: Option<usize>,
        pane_index: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid target: {0}")]
pub struct TargetParseError(pub String);

pub fn parse_target(raw: &str) -> Result<Target, TargetParseError> {
    if raw.is_empty() {
        return Ok(Target::Current);
    }
    if raw == "!" {
        return Ok(Target::Bang);
    }
    if raw == "{last}" {
        return Ok(Target::LastBraced);
    }
    if let Some(rest) = raw.strip_prefix('%') {
        return rest
            .parse::<u32>()
            .map(Target::PaneId)
            .map_err(|_| TargetParseError(raw.to_string()));
    }
    if let Some(rest) = raw.strip_prefix('@') {
        return rest
            .parse::<u32>()
            .map(Target::WindowId)
            .map_err(|_| TargetParseError(raw.to_string()));
    }

    // session_ref := name [ ':' win_index [ '.' pane_index ] ]
    let mut parts = raw.splitn(2, ':');
    let name = parts.next().unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(TargetParseError(raw.to_string()));
    }
    let rest = parts.next();
    let (window_index, pane_index) = match rest {
        None => (None, None),
        Some(rest) => {
            let mut idx_parts = rest.splitn(2, '.');
            let win = idx_parts.next().unwrap_or_default();
            let win_idx = if win.is_empty() {
                None
            } else {
                Some(
                    win.parse::<usize>()
                        .map_err(|_| TargetParseError(raw.to_string()))?,
                )
            };
            let pane_idx = match idx_parts.next() {
                None | Some("") => None,
                Some(p) => Some(
                    p.parse::<usize>()
                        .map_err(|_| TargetParseError(raw.to_string()))?,
                ),
            };
            (win_idx, pane_idx)
        }
    };

    Ok(Target::SessionRef {
        name,
        window_index,
        pane_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_as_current() {
        assert_eq!(parse_target("").unwrap(), Target::Current);
    }

    #[test]
    fn parses_sigils() {
        assert_eq!(parse_target("%7").unwrap(), Target::PaneId(7));
        assert_eq!(parse_target("@3").unwrap(), Target::WindowId(3));
        assert_eq!(parse_target("!").unwrap(), Target::Bang);
        assert_eq!(parse_target("{last}").unwrap(), Target::LastBraced);
    }

    #[test]
    fn parses_session_ref_triple() {
        assert_eq!(
            parse_target("work:1.2").unwrap(),
            Target::SessionRef {
                name: "work".to_string(),
                window_index: Some(1),
                pane_index: Some(2),
            }
        );
        assert_eq!(
            parse_target("work").unwrap(),
            Target::SessionRef {
                name: "work".to_string(),
                window_index: None,
                pane_index: None,
            }
        );
    }

    #[test]
    fn rejects_malformed_sigil() {
        assert!(parse_target("%abc").is_err());
        assert!(parse_target("@").is_err());
    }
}

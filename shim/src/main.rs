//! Command-shim wire client: a thin translator that hands an already-parsed
//! [`CommandRequest`] to the engine's control port and renders the
//! [`CommandResponse`] as tmux-style stdout/exit-code. Text-level argument
//! parsing (turning `new-session -s foo -c /tmp` into a `CommandRequest`)
//! happens upstream of this binary, not here.
//!
//! Grounded on the pack's `kild-tmux-shim` IPC round trip (one request,
//! one response, exit code carries success/failure) and on `control.rs`'s
//! line-delimited JSON protocol, which this binary speaks directly.

use std::io::ErrorKind;
use std::io::Read as _;

use myt_x_core::core::config::ConfigStore;
use myt_x_core::core::router::{CommandRequest, CommandResponse};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
enum ShimError {
    #[error("no engine is running (control port file not found at {0:?})")]
    NotRunning(std::path::PathBuf),
    #[error("could not connect to engine on port {0}: {1}")]
    Connect(u16, std::io::Error),
    #[error("i/o error talking to engine: {0}")]
    Io(#[from] std::io::Error),
    #[error("request was not valid json: {0}")]
    BadRequest(serde_json::Error),
    #[error("engine sent a malformed response: {0}")]
    BadResponse(serde_json::Error),
}

/// Reads the already-parsed request. A single argv is taken as the JSON
/// payload directly (the common case, used by the upstream translator);
/// with no argv the payload is read from stdin instead.
fn read_request() -> Result<CommandRequest, ShimError> {
    let raw = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(raw.trim()).map_err(ShimError::BadRequest)
}

async fn control_port() -> Result<u16, ShimError> {
    let config_path = ConfigStore::default_path();
    let port_file = config_path
        .parent()
        .map(|dir| dir.join("control-port"))
        .ok_or_else(|| ShimError::NotRunning(config_path.clone()))?;

    let contents = tokio::fs::read_to_string(&port_file).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ShimError::NotRunning(port_file.clone())
        } else {
            ShimError::Io(e)
        }
    })?;
    contents
        .trim()
        .parse()
        .map_err(|_| ShimError::NotRunning(port_file))
}

async fn send_request(req: &CommandRequest) -> Result<CommandResponse, ShimError> {
    let port = control_port().await?;
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .map_err(|e| ShimError::Connect(port, e))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_string(req).expect("CommandRequest always serializes");
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;
    drop(write_half);

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    let n = reader.read_line(&mut response_line).await?;
    if n == 0 {
        // Connection closed without a newline-terminated reply; drain
        // whatever remains in case the engine wrote without a trailing \n.
        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.ok();
        response_line.push_str(&rest);
    }

    serde_json::from_str(response_line.trim_end()).map_err(ShimError::BadResponse)
}

#[tokio::main]
async fn main() {
    let req = match read_request() {
        Ok(req) => req,
        Err(err) => {
            eprintln!("myt-x-shim: {err}");
            std::process::exit(1);
        }
    };

    match send_request(&req).await {
        Ok(response) => {
            if !response.text.is_empty() {
                println!("{}", response.text);
            }
            std::process::exit(if response.success { 0 } else { 1 });
        }
        Err(err) => {
            eprintln!("myt-x-shim: {err}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = CommandRequest {
            command: "send-keys".to_string(),
            target: "demo:0".to_string(),
            args: vec!["ls".to_string(), "Enter".to_string()],
            ..Default::default()
        };
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: CommandRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.command, "send-keys");
        assert_eq!(decoded.args, vec!["ls".to_string(), "Enter".to_string()]);
    }

    #[test]
    fn response_exit_code_follows_success_flag() {
        let success = CommandResponse {
            text: "ok".to_string(),
            success: true,
            error_kind: None,
        };
        assert_eq!(if success.success { 0 } else { 1 }, 0);

        let failure = CommandResponse {
            text: "no such session".to_string(),
            success: false,
            error_kind: None,
        };
        assert_eq!(if failure.success { 0 } else { 1 }, 1);
    }
}

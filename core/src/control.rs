//! Plain TCP control port: the shim's local IPC channel to the engine,
//! distinct from the WebSocket [`crate::core::transport::Transport`] used
//! by viewer/GUI clients. One JSON [`CommandRequest`] per line in, one
//! JSON [`CommandResponse`] per line out, one request per connection.
//!
//! Grounded on the teacher's `find_and_bind_port` loopback-scan idiom
//! (`status_server.rs`), adapted from HTTP to a raw line-delimited
//! protocol since the shim carries no HTTP or WebSocket client crate.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::app::App;
use crate::core::router::CommandRequest;

pub const CONTROL_PORT_RANGE: (u16, u16) = (7900, 7999);

/// Listener handle. Dropping it aborts the accept loop, used as the first
/// stage of the shutdown cascade in [`App::shutdown`].
pub struct ControlPort {
    port: u16,
    accept_task: JoinHandle<()>,
}

impl ControlPort {
    pub async fn start(app: Arc<App>, port_file: Option<PathBuf>) -> Option<Self> {
        let (port, listener) = find_and_bind_port(CONTROL_PORT_RANGE.0, CONTROL_PORT_RANGE.1).await?;

        if let Some(path) = port_file {
            if let Some(dir) = path.parent() {
                let _ = tokio::fs::create_dir_all(dir).await;
            }
            if let Err(err) = tokio::fs::write(&path, port.to_string()).await {
                log::warn!("failed to write control port file {path:?}: {err}");
            }
        }

        let accept_task = tokio::spawn(accept_loop(listener, app));
        Some(ControlPort { port, accept_task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for ControlPort {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn find_and_bind_port(start: u16, end: u16) -> Option<(u16, TcpListener)> {
    for port in start..=end {
        let addr = format!("127.0.0.1:{port}");
        if let Ok(listener) = TcpListener::bind(&addr).await {
            return Some((port, listener));
        }
    }
    None
}

async fn accept_loop(listener: TcpListener, app: Arc<App>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("control port accept failed: {err}");
                continue;
            }
        };
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, app).await {
                log::debug!("control connection ended: {err}");
            }
        });
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, app: Arc<App>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<CommandRequest>(line.trim_end()) {
        Ok(req) => app.handle_command(req).await,
        Err(err) => crate::core::router::CommandResponse::malformed(err.to_string()),
    };

    let mut out = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    out.push('\n');
    write_half.write_all(out.as_bytes()).await?;
    write_half.flush().await?;
    Ok(())
}

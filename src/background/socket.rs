use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::UnixListener;

use super::{Background, UiRequest};
use crate::error::{Error, Result};

/// Per-process socket path, short enough for `sockaddr_un`.
pub fn default_socket_path() -> PathBuf {
    use std::os::unix::ffi::OsStrExt;

    let preferred = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("passfill")
        .join(format!("passfill-{}.sock", std::process::id()));
    if preferred.as_os_str().as_bytes().len() < 100 {
        return preferred;
    }
    std::env::temp_dir().join(format!("passfill-{}.sock", std::process::id()))
}

/// Bounds on a single request so one client cannot hold up the others.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestLimits {
    pub(crate) read_timeout: Duration,
    pub(crate) max_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            max_bytes: 1024 * 1024,
        }
    }
}

struct SocketCleanup {
    path: PathBuf,
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Answer requests on `socket_path` until a `stop` request arrives or
/// `keep_running` turns false.
pub async fn serve(
    background: &Background,
    socket_path: &Path,
    keep_running: impl Fn() -> bool,
) -> Result<()> {
    serve_with_limits(background, socket_path, keep_running, RequestLimits::default()).await
}

pub(crate) async fn serve_with_limits(
    background: &Background,
    socket_path: &Path,
    keep_running: impl Fn() -> bool,
    limits: RequestLimits,
) -> Result<()> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    let _cleanup = SocketCleanup {
        path: socket_path.to_path_buf(),
    };
    log::info!("listening on {}", socket_path.display());

    let mut running = true;
    while running {
        if !keep_running() {
            log::info!("browser went away; stopping");
            break;
        }

        let (stream, _addr) =
            match tokio::time::timeout(Duration::from_millis(100), listener.accept()).await {
                Ok(accepted) => accepted?,
                Err(_) => continue,
            };

        let cap = u64::try_from(limits.max_bytes).unwrap_or(u64::MAX);
        let mut reader = BufReader::new(stream.take(cap));
        let mut body = String::new();
        let read = tokio::time::timeout(limits.read_timeout, reader.read_line(&mut body)).await;
        let read_result = match read {
            Ok(Ok(_)) if !body.ends_with('\n') && body.len() >= limits.max_bytes => {
                Err(format!("request exceeds {} bytes", limits.max_bytes))
            }
            Ok(read) => read.map_err(|err| err.to_string()),
            Err(_) => Err("timed out waiting for request".to_string()),
        };
        let mut stream = reader.into_inner().into_inner();

        let response = match read_result {
            Ok(0) => error_response("failed to read request: empty request".to_string()),
            Ok(_) => match serde_json::from_str::<UiRequest>(body.trim()) {
                Ok(UiRequest::Stop) => {
                    running = false;
                    json!({ "status": "ok" })
                }
                Ok(request) => background.handle(request).await,
                Err(err) => error_response(format!("invalid request: {err}")),
            },
            Err(err) => error_response(format!("failed to read request: {err}")),
        };
        if let Err(err) = write_response(&mut stream, &response).await {
            log::warn!("failed to write response: {err}");
        }
    }
    log::info!("socket session ended");
    Ok(())
}

fn error_response(message: String) -> Value {
    json!({ "status": "error", "message": message })
}

async fn write_response(stream: &mut tokio::net::UnixStream, response: &Value) -> std::io::Result<()> {
    let mut out = serde_json::to_vec(response)?;
    out.push(b'\n');
    tokio::io::AsyncWriteExt::write_all(stream, &out).await?;
    tokio::io::AsyncWriteExt::flush(stream).await
}

/// Send one request and wait for its response.
pub fn send_request(socket_path: &Path, request: &Value) -> Result<Value> {
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(socket_path)?;
    serde_json::to_writer(&mut stream, request)?;
    stream.write_all(b"\n")?;
    stream.shutdown(Shutdown::Write)?;

    let mut response_body = String::new();
    stream.read_to_string(&mut response_body)?;
    if response_body.trim().is_empty() {
        return Err(Error::Validation("empty response from socket".to_string()));
    }
    Ok(serde_json::from_str(response_body.trim())?)
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, error, info, warn};

pub mod dispatch;

pub use dispatch::{Dispatcher, EnvelopeError};

/// One request line
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: JsonValue,
    pub method: String,
    #[serde(default)]
    pub params: JsonValue,
}

/// One response line; exactly one of `result` / `error` is set
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl Response {
    fn ok(id: JsonValue, result: JsonValue) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failed(id: JsonValue, error: EnvelopeError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Decode and execute a single request line
pub fn handle_line(dispatcher: &Dispatcher, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            // Salvage the id when the line is valid JSON with a bad shape
            let id = serde_json::from_str::<JsonValue>(line)
                .ok()
                .and_then(|v| v.get("id").cloned())
                .unwrap_or(JsonValue::Null);
            return Response::failed(id, EnvelopeError::parse_error(format!("invalid request: {}", e)));
        }
    };

    match dispatcher.call(&request.method, request.params) {
        Ok(result) => Response::ok(request.id, result),
        Err(e) => {
            warn!("Request {} failed: {}", request.method, e.message);
            Response::failed(request.id, e)
        }
    }
}

/// Serve newline-delimited requests from `reader`, answering on `writer`.
///
/// Requests on one stream are answered in order; the work itself runs on the
/// blocking pool.
pub async fn serve_lines<R, W>(dispatcher: Arc<Dispatcher>, reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read request line")? {
        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = Arc::clone(&dispatcher);
        let response = tokio::task::spawn_blocking(move || handle_line(&dispatcher, &line))
            .await
            .context("Request handler panicked")?;

        let mut encoded = serde_json::to_vec(&response).context("Failed to encode response")?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await.context("Failed to write response")?;
        writer.flush().await.context("Failed to flush response")?;
        handled += 1;
    }

    Ok(handled)
}

/// Accept TCP connections until Ctrl+C, one task per connection
pub async fn serve_tcp(dispatcher: Arc<Dispatcher>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Listening on {}", listener.local_addr()?);

    loop {
        select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                debug!("New connection from {}", peer);

                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let (read_half, write_half) = stream.into_split();
                    match serve_lines(dispatcher, BufReader::new(read_half), write_half).await {
                        Ok(handled) => debug!("Connection {} closed after {} requests", peer, handled),
                        Err(e) => error!("Connection {} failed: {:#}", peer, e),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Serve requests from stdin until EOF
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!("🚀 Serving on stdio");
    let handled = serve_lines(dispatcher, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    info!("✅ Stdin closed after {} requests", handled);
    Ok(())
}

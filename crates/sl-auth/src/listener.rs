//! Loopback HTTP listener used as the OAuth redirect target.
//!
//! Only the request line is interpreted. Every request, whatever its method
//! or path, gets the same minimal HTML page before the handler sees it, so
//! the listener never reveals whether a callback was accepted.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AuthError, Result};

/// Upper bound on the request head (request line plus headers)
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

/// How long a connection may take to send its request head
const READ_DEADLINE: Duration = Duration::from_secs(5);

const NEUTRAL_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Slump</title></head>\
<body><p>You can close this window and return to the application.</p></body></html>";

/// The part of an incoming request the orchestrator cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    /// Raw query string, still percent-encoded
    pub query: String,
}

impl IncomingRequest {
    /// Parse an HTTP/1.x request line such as `GET /callback?code=x HTTP/1.1`
    pub fn from_request_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?;
        let version = parts.next()?;
        if !version.starts_with("HTTP/") || parts.next().is_some() {
            return None;
        }

        let target = target.split('#').next().unwrap_or_default();
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        Some(Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
        })
    }
}

/// Bind the loopback listener on `127.0.0.1:port`
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| AuthError::ListenerBind { port, source })
}

/// Running accept loop; closing it releases the port
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that fires when the listener is closed
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting and wait until the socket is released
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Loopback accept loop ended abnormally: {}", e);
            }
        }
        debug!(addr = %self.local_addr, "Loopback listener closed");
    }

    /// Stop accepting without waiting, for use from synchronous teardown
    pub fn abort(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Start serving `listener`. `handler` runs for every well-formed request
/// after the neutral response has been written.
pub fn serve<H, Fut>(listener: TcpListener, handler: H) -> Result<ListenerHandle>
where
    H: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .map_err(|source| AuthError::ListenerBind { port: 0, source })?;
    let cancel = CancellationToken::new();
    let handler = Arc::new(handler);

    info!(addr = %local_addr, "Loopback listener accepting redirects");
    let task = tokio::spawn(accept_loop(listener, handler, cancel.clone()));

    Ok(ListenerHandle {
        local_addr,
        cancel,
        task,
    })
}

async fn accept_loop<H, Fut>(listener: TcpListener, handler: Arc<H>, cancel: CancellationToken)
where
    H: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let handler = Arc::clone(&handler);
                    let cancel = cancel.clone();
                    // Detached: closing the listener must not abort a callback
                    // that is already exchanging its code.
                    tokio::spawn(async move {
                        if let Some(request) = respond(socket, peer, &cancel).await {
                            handler(request).await;
                        }
                    });
                }
                Err(e) => {
                    warn!("Loopback accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    // `listener` drops here, releasing the port before `close` returns.
}

async fn respond(
    mut socket: TcpStream,
    peer: SocketAddr,
    cancel: &CancellationToken,
) -> Option<IncomingRequest> {
    let head = tokio::select! {
        _ = cancel.cancelled() => return None,
        head = tokio::time::timeout(READ_DEADLINE, read_request_line(&mut socket)) => head,
    };

    let request_line = match head {
        Ok(Ok(line)) => line,
        Ok(Err(e)) => {
            debug!(%peer, "Failed to read loopback request: {}", e);
            None
        }
        Err(_) => {
            debug!(%peer, "Loopback request timed out");
            None
        }
    };

    if let Err(e) = write_neutral_page(&mut socket).await {
        debug!(%peer, "Failed to write loopback response: {}", e);
    }

    let request = request_line.as_deref().and_then(IncomingRequest::from_request_line);
    match &request {
        Some(req) => debug!(%peer, method = %req.method, path = %req.path, "Loopback request"),
        None => debug!(%peer, "Malformed loopback request"),
    }
    request
}

/// Read the request line and drain the headers, bounded by [`MAX_REQUEST_HEAD`]
async fn read_request_line(socket: &mut TcpStream) -> std::io::Result<Option<String>> {
    let (reader, _) = socket.split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_HEAD));

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut header = String::new();
    loop {
        header.clear();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    Ok(Some(request_line.trim_end().to_string()))
}

async fn write_neutral_page(socket: &mut TcpStream) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{}",
        NEUTRAL_PAGE.len(),
        NEUTRAL_PAGE
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await
}

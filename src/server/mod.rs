//! Async TCP server using Tokio.
//!
//! Accepts connections, parses HTTP/1.1 requests, and hands each one to a
//! handler function. Connections are persistent unless the client asks
//! otherwise.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (headers plus body) buffered before answering `413` (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use petal::{Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run_until(
///             |_req| async { Response::new(StatusCode::Ok).body("Hello!") },
///             async { let _ = tokio::signal::ctrl_c().await; },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves requests with `handler` until the process exits.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Serves requests with `handler` until `shutdown` resolves.
    ///
    /// Each connection runs on its own task; connections already accepted
    /// when `shutdown` fires are left to finish on their own.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "petal listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn write_and_close(stream: &mut TcpStream, response: Response) -> std::io::Result<()> {
    stream.write_all(&response.keep_alive(false).into_bytes()).await?;
    stream.flush().await
}

/// Serves one connection, one request per loop iteration, until the peer
/// closes it or a request opts out of keep-alive.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> std::io::Result<()>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered; only read when the
        // buffer cannot yield a complete request.
        let parsed = match Request::parse(&buf) {
            Ok((request, body_offset)) => {
                let total = body_offset + request.content_length().unwrap_or(0);
                (buf.len() >= total).then_some((request, total))
            }
            Err(RequestError::Incomplete) => None,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}"));
                return write_and_close(&mut stream, response).await;
            }
        };

        let Some((request, consumed)) = parsed else {
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large, sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge).body("Request entity too large");
                return write_and_close(&mut stream, response).await;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                return Ok(());
            }
            continue;
        };

        let keep_alive = request.is_keep_alive();
        let is_head = *request.method() == Method::Head;
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            target = %request.target(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        let wire = if is_head {
            response.into_head_bytes()
        } else {
            response.into_bytes()
        };
        stream.write_all(&wire).await?;
        stream.flush().await?;

        let _ = buf.split_to(consumed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(server.run_until(
            |req: Request| async move {
                Response::new(StatusCode::Ok).body(req.target().to_owned())
            },
            async move {
                let _ = stop_rx.await;
            },
        ));

        let text = exchange(addr, b"GET /roses?color=red HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("/roses?color=red"));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn head_reply_keeps_length_but_sends_no_body() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(|req: Request| async move {
            Response::new(StatusCode::Ok).body(req.path().to_owned())
        }));

        // The GET behind the HEAD on the same connection must still frame cleanly.
        let text = exchange(
            addr,
            b"HEAD /tulips HTTP/1.1\r\n\r\nGET /lilies HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (head_reply, get_reply) = text.split_once("\r\n\r\n").unwrap();
        assert!(head_reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head_reply.contains("Content-Length: 7"));
        assert!(get_reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(get_reply.ends_with("\r\n\r\n/lilies"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(|_req| async { Response::new(StatusCode::Ok) }));

        let text = exchange(addr, b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let err = Server::bind("127.0.0.1:not-a-port").await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains("127.0.0.1:not-a-port"));
    }
}

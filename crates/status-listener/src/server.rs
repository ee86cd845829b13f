//! Status listener accept loop.
//!
//! Binds the host and port of the listener URI and serves one HTTP/1.1
//! connection at a time with keep-alive disabled, so every request is
//! fully answered before the next one is accepted.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::forwarder::Forwarder;
use crate::handler::{self, HandlerError, Route};
use crate::{ListenerError, PONG_MESSAGE, UPDATED_MESSAGE};

/// Where the listener binds and which bot it answers for.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Absolute `http` URI; its path becomes the base of the prefix.
    pub listener_uri: String,
    pub bot_id: String,
}

impl ListenerConfig {
    /// The bot-specific path prefix, `{path}/monitor/{botId}/`.
    pub fn prefix(&self) -> Result<String, ListenerError> {
        let url = self.parse()?;
        Ok(format!(
            "{}/monitor/{}/",
            url.path().trim_end_matches('/'),
            self.bot_id
        ))
    }

    fn parse(&self) -> Result<url::Url, ListenerError> {
        url::Url::parse(&self.listener_uri)
            .map_err(|e| ListenerError::InvalidUri(format!("{}: {e}", self.listener_uri)))
    }
}

/// Sequential HTTP listener relaying status updates.
pub struct StatusListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    prefix: String,
    forwarder: Arc<dyn Forwarder>,
    cancel: CancellationToken,
}

impl StatusListener {
    /// Binds the socket. The listener serves nothing until [`run`](Self::run).
    pub async fn bind(
        config: ListenerConfig,
        forwarder: Arc<dyn Forwarder>,
        cancel: CancellationToken,
    ) -> Result<Self, ListenerError> {
        let url = config.parse()?;
        let host = url
            .host_str()
            .ok_or_else(|| ListenerError::InvalidUri(format!("{}: missing host", config.listener_uri)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ListenerError::InvalidUri(format!("{}: missing port", config.listener_uri)))?;

        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            prefix: config.prefix()?,
            forwarder,
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Accepts and serves connections until cancellation.
    ///
    /// An accept failure that is not caused by shutdown stops the listener
    /// with an error.
    pub async fn run(self) -> Result<(), ListenerError> {
        info!(addr = %self.local_addr, prefix = %self.prefix, "status listener ready");

        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match settle_accept(accepted, &self.cancel) {
                Ok(Some((stream, peer_addr))) => self.serve(stream, peer_addr).await,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "status listener accept failed");
                    return Err(ListenerError::Accept(e));
                }
            }
        }

        info!("status listener stopped");
        Ok(())
    }

    /// Serves a single connection to completion.
    async fn serve(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let io = TokioIo::new(stream);
        let service = service_fn(|req| self.handle(req));
        let conn = http1::Builder::new()
            .keep_alive(false)
            .serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = self.cancel.cancelled() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            warn!(%peer_addr, error = %e, "status connection error");
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(%method, %path, "status request");

        let response = match handler::route(&method, &path, &self.prefix) {
            Route::Ping => handler::json_response(
                StatusCode::OK,
                &serde_json::json!({ "message": PONG_MESSAGE }),
            ),
            Route::Update => match self.update(req).await {
                Ok(()) => {
                    info!("status update relayed to hub");
                    handler::json_response(
                        StatusCode::OK,
                        &serde_json::json!({ "message": UPDATED_MESSAGE }),
                    )
                }
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "status update failed");
                    handler::error_response(&e)
                }
            },
            Route::NotFound => handler::not_found(),
        };
        Ok(response)
    }

    async fn update(&self, req: Request<Incoming>) -> Result<(), HandlerError> {
        let charset = handler::charset_of(req.headers());
        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| HandlerError::Body(e.to_string()))?
            .to_bytes();

        let text = handler::decode_body(&body, charset.as_deref())?;
        let update = handler::parse_update(&text)?;
        self.forwarder.forward(update, self.cancel.clone()).await?;
        Ok(())
    }
}

/// Sorts an accept result: a connection to serve, a shutdown-caused abort
/// (`Ok(None)`), or a fault that ends the listener.
fn settle_accept<C>(accepted: io::Result<C>, cancel: &CancellationToken) -> io::Result<Option<C>> {
    match accepted {
        Ok(conn) => Ok(Some(conn)),
        Err(e) if cancel.is_cancelled() => {
            debug!("accept aborted by shutdown: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

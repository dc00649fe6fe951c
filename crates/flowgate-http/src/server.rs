//! Gateway HTTP server
//!
//! One listener serves both surfaces: paths under `/buckets` go to the
//! admin API, everything else enters the proxy pipeline. Each accepted
//! connection runs in its own task, registered with a `TaskTracker` so
//! graceful shutdown can close the listener first and then drain in-flight
//! work inside a bounded window.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::api::ApiHandler;
use crate::body::BoxedBody;
use crate::proxy::ProxyEngine;

/// Shared per-server state handed to every connection task.
pub struct AppState {
    pub proxy: ProxyEngine,
    pub api: ApiHandler,
}

/// The accept loop plus graceful shutdown handling.
pub struct GatewayServer {
    listener: TcpListener,
    state: Arc<AppState>,
    drain_timeout: Duration,
}

impl GatewayServer {
    /// Binds the listener. `addr` may be a `host:port` string with a
    /// resolvable hostname.
    pub async fn bind(
        addr: &str,
        state: Arc<AppState>,
        drain_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state,
            drain_timeout,
        })
    }

    /// The actual bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` fires, then drains.
    ///
    /// On cancellation the listener closes immediately (no new connections
    /// are accepted), and in-flight connections get up to the drain
    /// timeout to finish before the server stops waiting for them.
    pub async fn serve(self, shutdown: CancellationToken) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, "server listening");

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&self.state);
                    tracker.spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(route(state, req, peer).await) }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(error = %err, "connection error");
                        }
                    });
                }
                _ = shutdown.cancelled() => break,
            }
        }

        drop(self.listener);
        tracker.close();
        info!("listener closed, draining connections");

        if tokio::time::timeout(self.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!("drain window elapsed with connections still active");
        }

        info!("server stopped");
        Ok(())
    }
}

/// Splits traffic between the admin API and the proxy pipeline.
async fn route(
    state: Arc<AppState>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> Response<BoxedBody> {
    let path = req.uri().path();
    if path == "/buckets" || path.starts_with("/buckets/") {
        state.api.handle(req).await
    } else {
        state.proxy.handle(req, &peer.to_string()).await
    }
}

//! Reverse proxy engine
//!
//! The per-request pipeline: admission check against the bucket service,
//! backend selection through the balancer, then a streamed forward to the
//! chosen origin. Token consumption deliberately precedes selection: the
//! bucket limits admission attempts, not successful completions, so a
//! request that ends in 503 or 502 still spent its token.
//!
//! Status codes owned by the engine (never passed through from an origin):
//! 429 on rate limit, 500 on admission store failure, 503 on an empty live
//! set, 502 on origin transport failure. Everything the origin does answer
//! is streamed back verbatim, including its own 5xx.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::TryStreamExt;
use http_body_util::{BodyDataStream, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{self, HeaderMap, HeaderName};
use hyper::{Request, Response, StatusCode};
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use flowgate_balancer::Balancer;
use flowgate_core::config::ProxyConfig;
use flowgate_core::{BucketService, StoreError};

use crate::body::{text_response, BoxedBody};

/// Headers that belong to a single hop and are never forwarded,
/// in either direction.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Failures on the path from the engine to the origin.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid target url '{0}'")]
    InvalidTarget(String),
    #[error("origin transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The proxy pipeline for all non-admin traffic.
pub struct ProxyEngine {
    client: reqwest::Client,
    balancer: Arc<Balancer>,
    buckets: Arc<BucketService>,
}

impl ProxyEngine {
    /// Builds the engine and its shared origin transport.
    ///
    /// The reqwest pool covers the connect timeout, TCP keep-alive, idle
    /// timeout and per-host idle cap from [`ProxyConfig`]. Redirects are
    /// never followed; they belong to the client.
    pub fn new(
        cfg: &ProxyConfig,
        balancer: Arc<Balancer>,
        buckets: Arc<BucketService>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.timeout.as_std())
            .tcp_keepalive(cfg.keep_alive.as_std())
            .pool_idle_timeout(cfg.idle_conn_timeout.as_std())
            .pool_max_idle_per_host(cfg.max_idle_conns_per_host as usize)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            balancer,
            buckets,
        })
    }

    /// Handles one proxied request from the given remote peer.
    pub async fn handle<B>(&self, req: Request<B>, remote_addr: &str) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("proxy", %request_id);
        self.admit_and_forward(req, remote_addr)
            .instrument(span)
            .await
    }

    async fn admit_and_forward<B>(&self, req: Request<B>, remote_addr: &str) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let client_id = client_identity(remote_addr);

        if let Err(err) = self.buckets.try_consume(&client_id).await {
            return match err {
                StoreError::NotEnoughTokens => {
                    info!(client_id = %client_id, "rate limit exceeded");
                    text_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
                }
                other => {
                    error!(client_id = %client_id, error = %other, "admission check failed");
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            };
        }

        let backend = match self.balancer.next_backend() {
            Ok(backend) => backend,
            Err(err) => {
                info!(error = %err, "no backends available");
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
            }
        };

        info!(
            backend = %backend,
            method = %req.method(),
            path = req.uri().path(),
            "proxying request"
        );

        match self.forward(req, &backend).await {
            Ok(response) => response,
            Err(err) => {
                error!(backend = %backend, error = %err, "origin request failed");
                text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }

    /// Rewrites the request onto `backend` and streams both bodies through.
    async fn forward<B>(
        &self,
        req: Request<B>,
        backend: &str,
    ) -> Result<Response<BoxedBody>, ForwardError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        // Path and query are preserved verbatim; only scheme, host and the
        // Host header come from the chosen backend.
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{}", backend.trim_end_matches('/'), path_and_query);
        let url: reqwest::Url = target
            .parse()
            .map_err(|_| ForwardError::InvalidTarget(target.clone()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // reqwest derives the Host header from the target URL.
        headers.remove(header::HOST);

        let request = self.client.request(parts.method, url).headers(headers);
        // Bodyless requests go out bodyless; anything else streams through
        // without buffering.
        let request = if body.is_end_stream() {
            request
        } else {
            request.body(reqwest::Body::wrap_stream(BodyDataStream::new(body)))
        };
        let origin = request.send().await?;

        let mut builder = Response::builder().status(origin.status());
        for (name, value) in origin.headers() {
            if !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }

        let origin_body = origin
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(io::Error::other);
        let response = builder
            .body(BoxedBody::new(StreamBody::new(origin_body)))
            .expect("response built from valid origin parts");
        Ok(response)
    }
}

/// Client identity for rate limiting: the IP portion of the remote address,
/// falling back to the raw string when it does not parse.
fn client_identity(remote_addr: &str) -> String {
    remote_addr
        .parse::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| remote_addr.to_string())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.as_str().eq_ignore_ascii_case(hop))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for hop in HOP_BY_HOP_HEADERS {
        headers.remove(hop);
    }
}

//! Backend health checking
//!
//! A periodic probe loop that rewrites the balancer's live set from
//! observed reachability. The configured backend list itself is never
//! mutated; only the live subset published to the balancer changes.
//!
//! Liveness rule per probe: an HTTP response with status below 500 counts
//! as alive (4xx included), 500 and above counts as dead. When the HTTP
//! call fails outright, a raw TCP dial to the backend's host and port
//! decides instead, so an origin that cannot speak HTTP yet is kept in
//! rotation while it warms up.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flowgate_balancer::Balancer;
use flowgate_core::Config;

/// Periodically probes the configured backends and publishes the healthy
/// subset to the balancer.
pub struct HealthChecker {
    backends: Vec<String>,
    interval: Duration,
    timeout: Duration,
    balancer: Arc<Balancer>,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(cfg: &Config, balancer: Arc<Balancer>) -> Self {
        Self {
            backends: cfg.balancer.backends.clone(),
            interval: cfg.proxy.health_checker.interval.as_std(),
            timeout: cfg.proxy.health_checker.health_check_timeout.as_std(),
            balancer,
            client: reqwest::Client::new(),
        }
    }

    /// Runs the probe loop until `shutdown` fires.
    ///
    /// Rounds never overlap: the next tick is not armed until the current
    /// round finished. Cancellation is honored both between rounds and at
    /// every await point inside a round.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health checker stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health checker stopped mid-round");
                    return;
                }
                _ = self.run_once() => {}
            }
        }
    }

    /// Runs a single probe round and publishes the result.
    pub async fn run_once(&self) {
        let mut alive = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            if self.check_one(backend).await {
                alive.push(backend.clone());
            } else {
                info!(backend = %backend, "health check failed");
            }
        }

        info!(
            alive = alive.len(),
            total = self.backends.len(),
            "health check round complete"
        );

        self.balancer.reset_backends(alive);
    }

    /// Probes one backend: HTTP GET first, TCP dial as the fallback.
    async fn check_one(&self, backend: &str) -> bool {
        match self
            .client
            .get(backend)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => self.tcp_probe(backend).await,
        }
    }

    async fn tcp_probe(&self, backend: &str) -> bool {
        let Some(authority) = host_port(backend) else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(authority.as_str())).await,
            Ok(Ok(_))
        )
    }
}

/// Extracts `host:port` from a backend base URL, defaulting the port from
/// the scheme.
fn host_port(backend: &str) -> Option<String> {
    let url = url::Url::parse(backend).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_extraction() {
        assert_eq!(
            host_port("http://10.0.0.1:8081").as_deref(),
            Some("10.0.0.1:8081")
        );
        assert_eq!(host_port("http://example.com").as_deref(), Some("example.com:80"));
        assert_eq!(
            host_port("https://example.com/path").as_deref(),
            Some("example.com:443")
        );
        assert_eq!(host_port("not a url"), None);
    }
}

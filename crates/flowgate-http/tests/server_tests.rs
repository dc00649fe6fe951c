//! Gateway server integration tests
//!
//! Full wiring over a real listener: path-based routing between the admin
//! API and the proxy pipeline, plus graceful shutdown with an in-flight
//! request.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{api, proxy, stack, TestStack};
use flowgate_http::{AppState, GatewayServer};

async fn serve_stack(
    stack: &TestStack,
    drain_timeout: Duration,
) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<std::io::Result<()>>) {
    let state = Arc::new(AppState {
        proxy: proxy(stack),
        api: api(stack),
    });
    let server = GatewayServer::bind("127.0.0.1:0", state, drain_timeout)
        .await
        .expect("bind listener");
    let addr = server.local_addr().expect("local addr");

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));

    (addr, shutdown, handle)
}

#[tokio::test]
async fn routes_admin_and_proxied_traffic() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("from origin"))
        .mount(&origin)
        .await;

    let stack = stack(vec![origin.uri()], 10).await;
    let (addr, shutdown, handle) = serve_stack(&stack, Duration::from_secs(5)).await;

    let client = reqwest::Client::new();

    // Admin surface under /buckets.
    let response = client
        .post(format!("http://{addr}/buckets"))
        .body(r#"{"client_id": "c1", "capacity": 10, "tokens": 10}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = client
        .get(format!("http://{addr}/buckets/c1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Everything else is proxied.
    let response = client
        .get(format!("http://{addr}/anything/else"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "from origin");

    // Dropping the client closes its pooled connections so the drain
    // finishes immediately.
    drop(client);
    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn proxied_request_is_rate_limited_per_peer_ip() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&origin)
        .await;

    let stack = stack(vec![origin.uri()], 1).await;
    let (addr, shutdown, handle) = serve_stack(&stack, Duration::from_secs(5)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Same loopback peer IP, bucket now empty.
    let response = client
        .get(format!("http://{addr}/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 429);

    drop(client);
    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn graceful_shutdown_completes_inflight_and_stops_accepting() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow origin")
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&origin)
        .await;

    let stack = stack(vec![origin.uri()], 10).await;
    let (addr, shutdown, handle) = serve_stack(&stack, Duration::from_secs(3)).await;

    // Start a request against the slow origin, then cancel mid-flight.
    let inflight = tokio::spawn(async move {
        reqwest::Client::new()
            .get(format!("http://{addr}/slow"))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    // The in-flight response still completes inside the drain window.
    let response = inflight.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "slow origin");

    // The server task itself winds down within the drain timeout.
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop after cancellation")
        .unwrap()
        .unwrap();

    // And no new connections are accepted.
    let err = reqwest::Client::new()
        .get(format!("http://{addr}/x"))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(err.is_err(), "listener still accepting after shutdown");
}

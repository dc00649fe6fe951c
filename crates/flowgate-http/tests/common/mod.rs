//! Shared helpers for flowgate-http integration tests
#![allow(dead_code)]

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};

use flowgate_balancer::{create_strategy, Balancer};
use flowgate_core::config::Duration as ConfigDuration;
use flowgate_core::{BucketService, Config};
use flowgate_http::{ApiHandler, BoxedBody, ProxyEngine};
use flowgate_store::{DatabasePool, SqliteBucketStore};

/// Everything a test needs to drive the HTTP layer against a live
/// in-memory store.
pub struct TestStack {
    pub cfg: Config,
    pub pool: DatabasePool,
    pub store: Arc<SqliteBucketStore>,
    pub buckets: Arc<BucketService>,
    pub balancer: Arc<Balancer>,
}

/// Builds a stack with the given backends and bucket capacity.
///
/// The refill interval is long enough that no refill fires during a test
/// unless the test manipulates `last_refill` itself.
pub async fn stack(backends: Vec<String>, capacity: i64) -> TestStack {
    let mut cfg = Config::default();
    cfg.bucket.capacity = capacity;
    cfg.bucket.refill.interval = ConfigDuration::from_secs(60);
    cfg.balancer.backends = backends.clone();

    let pool = DatabasePool::in_memory().await.expect("in-memory pool");
    let store = Arc::new(SqliteBucketStore::new(pool.pool().clone()));
    let store_port: Arc<dyn flowgate_core::BucketStore> = store.clone() as Arc<dyn flowgate_core::BucketStore>;
    let buckets = Arc::new(BucketService::new(&cfg, store_port));

    let strategy = create_strategy(&cfg.balancer.strategy, backends).expect("strategy");
    let balancer = Arc::new(Balancer::new(strategy));

    TestStack {
        cfg,
        pool,
        store,
        buckets,
        balancer,
    }
}

pub fn proxy(stack: &TestStack) -> ProxyEngine {
    ProxyEngine::new(
        &stack.cfg.proxy,
        Arc::clone(&stack.balancer),
        Arc::clone(&stack.buckets),
    )
    .expect("origin client")
}

pub fn api(stack: &TestStack) -> ApiHandler {
    ApiHandler::new(Arc::clone(&stack.buckets), stack.cfg.api.default_limit)
}

pub fn request(method: &str, uri: &str, body: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("build request")
}

pub async fn read_body(response: Response<BoxedBody>) -> String {
    let collected = response.into_body().collect().await.expect("collect body");
    String::from_utf8(collected.to_bytes().to_vec()).expect("utf8 body")
}

//! Administrative bucket API
//!
//! JSON CRUD over the bucket service, served from the same listener as the
//! proxied traffic under the `/buckets` prefix:
//!
//! | Method | Path                  | Success          |
//! |--------|-----------------------|------------------|
//! | POST   | `/buckets`            | 201 with echo    |
//! | GET    | `/buckets?limit=&offset=` | 200 with array |
//! | GET    | `/buckets/{client_id}` | 200 with object |
//! | PUT    | `/buckets/{client_id}` | 204             |
//! | PATCH  | `/buckets/{client_id}` | 204             |
//! | DELETE | `/buckets/{client_id}` | 204             |
//!
//! This handler is the sole translator from error kinds to status codes;
//! nothing below it picks an HTTP status.

use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use flowgate_core::{Bucket, BucketService, StoreError};

use crate::body::{json_response, status_response, text_response, BoxedBody};

/// PUT payload: capacity change only.
#[derive(Debug, Deserialize)]
struct CapacityPayload {
    capacity: i64,
}

/// PATCH payload: token count change only.
#[derive(Debug, Deserialize)]
struct TokensPayload {
    tokens: i64,
}

/// Handler for the `/buckets` administrative surface.
pub struct ApiHandler {
    buckets: Arc<BucketService>,
    default_limit: i64,
}

impl ApiHandler {
    pub fn new(buckets: Arc<BucketService>, default_limit: i64) -> Self {
        Self {
            buckets,
            default_limit,
        }
    }

    /// Routes one admin request.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("admin", %request_id);
        self.dispatch(req).instrument(span).await
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
    {
        info!(
            method = %req.method(),
            path = req.uri().path(),
            "incoming request"
        );

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if path == "/buckets" {
            return if method == Method::GET {
                let query = req.uri().query().unwrap_or("").to_string();
                self.list_buckets(&query).await
            } else if method == Method::POST {
                self.create_bucket(req).await
            } else {
                text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            };
        }

        if let Some(client_id) = path.strip_prefix("/buckets/") {
            let client_id = client_id.to_string();
            return if method == Method::GET {
                self.get_bucket(&client_id).await
            } else if method == Method::PUT {
                self.update_capacity(&client_id, req).await
            } else if method == Method::PATCH {
                self.update_tokens(&client_id, req).await
            } else if method == Method::DELETE {
                self.remove_bucket(&client_id).await
            } else {
                text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            };
        }

        text_response(StatusCode::NOT_FOUND, "Not Found")
    }

    // -----------------------------------------------------------------
    // Routes
    // -----------------------------------------------------------------

    async fn create_bucket<B>(&self, req: Request<B>) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
    {
        let payload: Bucket = match decode_json(req).await {
            Ok(payload) => payload,
            Err(response) => return response,
        };

        if let Err(err) = self.buckets.create_bucket(&payload).await {
            return service_error_response(&err);
        }

        info!(
            client_id = %payload.client_id,
            capacity = payload.capacity,
            "bucket created"
        );
        json_response(StatusCode::CREATED, &payload)
    }

    async fn list_buckets(&self, query: &str) -> Response<BoxedBody> {
        let limit = parse_or_default(query_param(query, "limit"), self.default_limit);
        let offset = parse_or_default(query_param(query, "offset"), 0);

        match self.buckets.list_buckets(limit, offset).await {
            Ok(buckets) => {
                info!(returned = buckets.len(), "listed buckets");
                json_response(StatusCode::OK, &buckets)
            }
            Err(err) => service_error_response(&err),
        }
    }

    async fn get_bucket(&self, client_id: &str) -> Response<BoxedBody> {
        match self.buckets.get_bucket(client_id).await {
            Ok(bucket) => {
                info!(client_id = %client_id, "fetched bucket");
                json_response(StatusCode::OK, &bucket)
            }
            Err(err) => service_error_response(&err),
        }
    }

    async fn update_capacity<B>(&self, client_id: &str, req: Request<B>) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
    {
        let payload: CapacityPayload = match decode_json(req).await {
            Ok(payload) => payload,
            Err(response) => return response,
        };

        if let Err(err) = self.buckets.update_capacity(client_id, payload.capacity).await {
            return service_error_response(&err);
        }

        info!(
            client_id = %client_id,
            new_capacity = payload.capacity,
            "capacity updated"
        );
        status_response(StatusCode::NO_CONTENT)
    }

    async fn update_tokens<B>(&self, client_id: &str, req: Request<B>) -> Response<BoxedBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        Bytes: From<B::Data>,
    {
        let payload: TokensPayload = match decode_json(req).await {
            Ok(payload) => payload,
            Err(response) => return response,
        };

        if let Err(err) = self.buckets.update_tokens(client_id, payload.tokens).await {
            return service_error_response(&err);
        }

        info!(
            client_id = %client_id,
            new_tokens = payload.tokens,
            "tokens updated"
        );
        status_response(StatusCode::NO_CONTENT)
    }

    async fn remove_bucket(&self, client_id: &str) -> Response<BoxedBody> {
        if let Err(err) = self.buckets.remove_bucket(client_id).await {
            return service_error_response(&err);
        }

        info!(client_id = %client_id, "bucket deleted");
        status_response(StatusCode::NO_CONTENT)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Collects the request body and decodes it as JSON, or yields the 400
/// response to return as-is.
async fn decode_json<T, B>(req: Request<B>) -> Result<T, Response<BoxedBody>>
where
    T: DeserializeOwned,
    B: Body + Send + 'static,
    B::Data: Send,
    Bytes: From<B::Data>,
{
    let collected = match req.into_body().collect().await {
        Ok(collected) => collected,
        Err(_) => {
            info!("failed to read request body");
            return Err(text_response(StatusCode::BAD_REQUEST, "Bad Request"));
        }
    };

    match serde_json::from_slice(&collected.to_bytes()) {
        Ok(value) => Ok(value),
        Err(err) => {
            info!(error = %err, "invalid JSON payload");
            Err(text_response(StatusCode::BAD_REQUEST, "Bad Request"))
        }
    }
}

/// The single place error kinds become admin status codes.
fn service_error_response(err: &StoreError) -> Response<BoxedBody> {
    match err {
        StoreError::NotFound => text_response(StatusCode::NOT_FOUND, "Not Found"),
        StoreError::InvalidInput(_) | StoreError::TokensExceedCapacity => {
            text_response(StatusCode::BAD_REQUEST, &format!("Bad Request: {err}"))
        }
        StoreError::Conflict(_) => {
            text_response(StatusCode::CONFLICT, &format!("Conflict: {err}"))
        }
        other => {
            error!(error = %other, "internal error");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

/// Non-parseable or absent values silently fall back to the default.
fn parse_or_default(raw: Option<String>, default: i64) -> i64 {
    raw.and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_picks_matching_key() {
        assert_eq!(query_param("limit=5&offset=2", "limit").as_deref(), Some("5"));
        assert_eq!(query_param("limit=5&offset=2", "offset").as_deref(), Some("2"));
        assert_eq!(query_param("limit=5", "offset"), None);
        assert_eq!(query_param("", "limit"), None);
    }

    #[test]
    fn parse_or_default_falls_back_silently() {
        assert_eq!(parse_or_default(Some("25".into()), 50), 25);
        assert_eq!(parse_or_default(Some("abc".into()), 50), 50);
        assert_eq!(parse_or_default(None, 50), 50);
    }
}

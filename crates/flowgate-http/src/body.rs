//! Response body plumbing shared by the proxy and the admin API

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Boxed response body that is `Send` but not required to be `Sync`.
///
/// The streamed origin body is not `Sync`, which rules out
/// `http_body_util`'s `BoxBody`; hyper only needs `Send` to drive the
/// connection from its spawned task.
pub struct BoxedBody {
    inner: Pin<Box<dyn Body<Data = Bytes, Error = io::Error> + Send>>,
}

impl BoxedBody {
    pub(crate) fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes, Error = io::Error> + Send + 'static,
    {
        Self {
            inner: Box::pin(body),
        }
    }
}

impl Body for BoxedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        self.get_mut().inner.as_mut().poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl fmt::Debug for BoxedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedBody").finish_non_exhaustive()
    }
}

pub(crate) fn full(data: impl Into<Bytes>) -> BoxedBody {
    BoxedBody::new(Full::new(data.into()).map_err(|never| match never {}))
}

pub(crate) fn empty() -> BoxedBody {
    BoxedBody::new(Empty::<Bytes>::new().map_err(|never| match never {}))
}

/// Plain-text response in the shape the proxy's own error pages use.
pub(crate) fn text_response(status: StatusCode, message: &str) -> Response<BoxedBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full(message.to_string()))
        .unwrap()
}

/// Response with no body, e.g. 204 No Content.
pub(crate) fn status_response(status: StatusCode) -> Response<BoxedBody> {
    Response::builder().status(status).body(empty()).unwrap()
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<BoxedBody> {
    match serde_json::to_vec(value) {
        Ok(encoded) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(full(encoded))
            .unwrap(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode JSON response");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

//! Interchangeable HTTP stacks that perform a single upload and report its timing.
//!
//! Every [`Transport`] takes the same [`UploadRequest`] and produces the same
//! [`UploadResponse`], so trials can be run against different client implementations with
//! identical payloads. Implementations never retry and never follow redirects.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use url::{Position, Url};

use crate::error::{Error, Result};
use crate::payload::LargeStream;

mod http1;
mod reqwest;

pub use self::http1::Http1Transport;
pub use self::reqwest::ReqwestTransport;
pub(crate) use self::reqwest::client_builder;

/// User agent sent by all transports and the blob client.
pub const USER_AGENT: &str = concat!("uploadbench/", env!("CARGO_PKG_VERSION"));

/// An HTTP stack that can perform uploads.
///
/// Transports start out idle, are opened either explicitly or by the first request, and are
/// closed at the end of their life. Closing is idempotent, and dropping an open transport releases
/// its connections as well.
#[async_trait::async_trait]
pub trait Transport: fmt::Debug + Send {
    /// The transport name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Acquires the underlying client or connection.
    async fn open(&mut self) -> Result<()>;

    /// Performs a single HTTP exchange.
    ///
    /// The request must carry a `Content-Length` header that matches the body.
    async fn send(&mut self, request: UploadRequest, mode: ResponseMode) -> Result<UploadResponse>;

    /// Releases the underlying client or connection.
    ///
    /// Any further [`send`](Self::send) fails with [`Error::Closed`].
    async fn close(&mut self) -> Result<()>;
}

/// The body of an upload.
pub enum UploadBody {
    /// A lazily generated payload, pulled by the HTTP client in chunks.
    Stream(LargeStream),
    /// A fully materialized payload.
    Buffer(Bytes),
}

impl UploadBody {
    /// The number of bytes this body will send.
    pub fn len(&self) -> u64 {
        match self {
            UploadBody::Stream(source) => source.remaining(),
            UploadBody::Buffer(bytes) => bytes.len() as u64,
        }
    }

    /// Returns `true` if the body sends no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Stream(source) => f.debug_tuple("Stream").field(source).finish(),
            UploadBody::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
        }
    }
}

impl From<LargeStream> for UploadBody {
    fn from(source: LargeStream) -> Self {
        UploadBody::Stream(source)
    }
}

impl From<Bytes> for UploadBody {
    fn from(bytes: Bytes) -> Self {
        UploadBody::Buffer(bytes)
    }
}

/// A single upload request.
#[derive(Debug)]
pub struct UploadRequest {
    /// The HTTP method, usually `PUT`.
    pub method: Method,
    /// The fully resolved target URL.
    pub url: Url,
    /// Request headers, including `Content-Length`.
    pub headers: HeaderMap,
    /// The payload.
    pub body: UploadBody,
}

impl UploadRequest {
    /// Creates a request without any headers.
    pub fn new(method: Method, url: Url, body: impl Into<UploadBody>) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Creates a `PUT` request.
    pub fn put(url: Url, body: impl Into<UploadBody>) -> Self {
        Self::new(Method::PUT, url, body)
    }

    /// Adds all of the given headers, replacing existing values.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Sets `Content-Length` to the length of the body.
    pub fn with_content_length(mut self) -> Self {
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        self
    }

    /// Verifies that the declared `Content-Length` matches the body.
    ///
    /// Streaming bodies cannot be measured by the HTTP clients, so this header is mandatory.
    pub fn check_content_length(&self) -> Result<u64> {
        let actual = self.body.len();
        let declared = self
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        match declared {
            Some(declared) if declared == actual => Ok(actual),
            declared => Err(Error::ContentLength { declared, actual }),
        }
    }
}

/// Controls whether a transport reads the full response before returning.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseMode {
    /// Drain the response body before returning, so timing covers the whole exchange.
    #[default]
    Buffered,
    /// Return the open response body in [`UploadResponse::body`].
    Streaming,
}

/// An open response body.
///
/// Holding this keeps the underlying connection busy. Either [`drain`](Self::drain) or
/// [`close`](Self::close) it to release the connection.
pub struct ResponseBody {
    stream: BoxStream<'static, Result<Bytes>>,
}

impl ResponseBody {
    pub(crate) fn new(stream: BoxStream<'static, Result<Bytes>>) -> Self {
        Self { stream }
    }

    /// Reads the next chunk of the response, or `None` once the body is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.stream.try_next().await
    }

    /// Reads the remainder of the response and returns the number of bytes read.
    pub async fn drain(mut self) -> Result<u64> {
        let mut total = 0;
        while let Some(chunk) = self.chunk().await? {
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    /// Discards the response without reading it.
    pub fn close(self) {}
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

/// The outcome of a single exchange.
#[derive(Debug)]
pub struct UploadResponse {
    /// The status code returned by the endpoint.
    pub status: StatusCode,
    /// Wall-clock time from sending the request until the response was complete.
    ///
    /// In streaming mode, this ends when the response headers arrived.
    pub elapsed: Duration,
    /// The still open response body, only present in [`ResponseMode::Streaming`].
    pub body: Option<ResponseBody>,
}

/// Completes an exchange according to `mode`.
pub(crate) async fn finish(
    status: StatusCode,
    start: Instant,
    body: ResponseBody,
    mode: ResponseMode,
) -> Result<UploadResponse> {
    let body = match mode {
        ResponseMode::Buffered => {
            body.drain().await?;
            None
        }
        ResponseMode::Streaming => Some(body),
    };

    Ok(UploadResponse {
        status,
        elapsed: start.elapsed(),
        body,
    })
}

/// Returns the URL without query or fragment, which may contain access tokens.
pub(crate) fn redacted(url: &Url) -> &str {
    &url[..Position::AfterPath]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        "https://account.blob.example/container/blob?sig=secret"
            .parse()
            .unwrap()
    }

    #[test]
    fn content_length_must_match() {
        let request = UploadRequest::put(url(), LargeStream::new(10));
        assert!(matches!(
            request.check_content_length(),
            Err(Error::ContentLength {
                declared: None,
                actual: 10
            })
        ));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(11));
        let request = request.headers(&headers);
        assert!(matches!(
            request.check_content_length(),
            Err(Error::ContentLength {
                declared: Some(11),
                actual: 10
            })
        ));

        let request = request.with_content_length();
        assert_eq!(request.check_content_length().unwrap(), 10);
    }

    #[test]
    fn body_length() {
        assert_eq!(UploadBody::from(LargeStream::new(5)).len(), 5);
        assert_eq!(UploadBody::from(Bytes::from_static(b"abc")).len(), 3);
        assert!(UploadBody::from(Bytes::new()).is_empty());
    }

    #[test]
    fn redacts_query() {
        assert_eq!(
            redacted(&url()),
            "https://account.blob.example/container/blob"
        );
    }
}

use http::StatusCode;

/// Errors that can happen while running upload trials.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection and socket errors, including TLS handshake failures and timeouts.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Any error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Protocol errors from the low-level [`hyper`] connection.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Errors assembling an HTTP request.
    #[error(transparent)]
    Http(#[from] http::Error),
    /// Errors setting up the TLS client configuration.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    /// Invalid header value.
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// The target URL cannot be used for uploads.
    #[error("{message}")]
    InvalidUrl {
        /// The URL error message.
        message: String,
    },
    /// The transport has been closed and cannot send any more requests.
    #[error("transport `{transport}` is closed")]
    Closed {
        /// Name of the closed transport.
        transport: &'static str,
    },
    /// The `Content-Length` header is missing or disagrees with the body.
    #[error("content-length {declared:?} does not match body length {actual}")]
    ContentLength {
        /// The declared length, if the header was present and numeric.
        declared: Option<u64>,
        /// The actual number of bytes in the body.
        actual: u64,
    },
    /// The endpoint answered with a status that ends the benchmark.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// The status code returned by the endpoint.
        status: StatusCode,
        /// The target URL, without query parameters.
        url: String,
    },
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

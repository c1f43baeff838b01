//! A request pipeline that layers standard blob-service headers on top of any [`Transport`].

use http::header::USER_AGENT;
use http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

use crate::error::Result;
use crate::transport::{self, ResponseMode, Transport, UploadRequest, UploadResponse};

/// Header carrying the client-generated request id, echoed by the service.
pub const CLIENT_REQUEST_ID: HeaderName = HeaderName::from_static("x-ms-client-request-id");

/// Header selecting the blob service API version.
pub const SERVICE_VERSION: HeaderName = HeaderName::from_static("x-ms-version");

/// The blob service API version sent by default.
pub const DEFAULT_SERVICE_VERSION: &str = "2021-08-06";

/// The response of a [`Pipeline::run`], along with the request id used to send it.
#[derive(Debug)]
pub struct PipelineResponse {
    /// The response as reported by the transport.
    pub http_response: UploadResponse,
    /// The value of the `x-ms-client-request-id` header the request was sent with.
    pub request_id: String,
}

/// Sends requests through a [`Transport`], adding default headers and logging.
///
/// Headers already present on a request take precedence over the pipeline defaults.
#[derive(Debug)]
pub struct Pipeline<T> {
    transport: T,
    headers: HeaderMap,
}

impl<T: Transport> Pipeline<T> {
    /// Creates a pipeline on top of the given transport.
    pub fn new(transport: T) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(transport::USER_AGENT));
        headers.insert(
            SERVICE_VERSION,
            HeaderValue::from_static(DEFAULT_SERVICE_VERSION),
        );

        Self { transport, headers }
    }

    /// Adds a default header to every request sent through this pipeline.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the underlying transport.
    pub async fn open(&mut self) -> Result<()> {
        self.transport.open().await
    }

    /// Closes the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Sends the request and reads the complete response.
    pub async fn run(&mut self, request: UploadRequest) -> Result<PipelineResponse> {
        self.run_with_mode(request, ResponseMode::Buffered).await
    }

    /// Sends the request, returning the open response body in streaming mode.
    pub async fn run_with_mode(
        &mut self,
        mut request: UploadRequest,
        mode: ResponseMode,
    ) -> Result<PipelineResponse> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }

        let request_id = match request.headers.get(CLIENT_REQUEST_ID) {
            Some(value) => value.to_str().unwrap_or_default().to_owned(),
            None => {
                let request_id = Uuid::new_v4().to_string();
                request
                    .headers
                    .insert(CLIENT_REQUEST_ID, HeaderValue::from_str(&request_id)?);
                request_id
            }
        };

        tracing::debug!(
            transport = self.transport.name(),
            method = %request.method,
            url = transport::redacted(&request.url),
            %request_id,
            "sending request"
        );

        let http_response = self.transport.send(request, mode).await?;

        tracing::debug!(
            transport = self.transport.name(),
            status = http_response.status.as_u16(),
            elapsed = ?http_response.elapsed,
            %request_id,
            "received response"
        );

        Ok(PipelineResponse {
            http_response,
            request_id,
        })
    }
}

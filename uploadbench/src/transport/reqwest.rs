use std::time::{Duration, Instant};

use futures_util::{StreamExt, TryStreamExt};

use super::{
    ResponseBody, ResponseMode, Transport, USER_AGENT, UploadBody, UploadRequest, UploadResponse,
};
use crate::error::{Error, Result};

/// Returns a [`reqwest::ClientBuilder`] with the settings shared by all benchmark clients.
///
/// Redirects are never followed, so that trials always measure the endpoint they were pointed at.
pub(crate) fn client_builder(connect_timeout: Option<Duration>) -> ::reqwest::ClientBuilder {
    let mut builder = ::reqwest::Client::builder()
        .redirect(::reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT);

    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    builder
}

#[derive(Debug)]
enum State {
    Idle,
    Open(::reqwest::Client),
    Closed,
}

/// A transport backed by [`reqwest`], which manages its own connection pool.
#[derive(Debug)]
pub struct ReqwestTransport {
    connect_timeout: Option<Duration>,
    state: State,
}

impl ReqwestTransport {
    /// Creates an idle transport. The client is built when the transport is opened.
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
            state: State::Idle,
        }
    }

    /// Bounds the time spent establishing new connections.
    pub fn connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    fn client(&mut self) -> Result<&::reqwest::Client> {
        if let State::Idle = self.state {
            let client = client_builder(self.connect_timeout).build()?;
            self.state = State::Open(client);
        }

        match &self.state {
            State::Open(client) => Ok(client),
            _ => Err(Error::Closed {
                transport: self.name(),
            }),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn open(&mut self) -> Result<()> {
        self.client()?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(url = super::redacted(&request.url)))]
    async fn send(&mut self, request: UploadRequest, mode: ResponseMode) -> Result<UploadResponse> {
        request.check_content_length()?;
        let client = self.client()?.clone();

        let body = match request.body {
            UploadBody::Stream(source) => ::reqwest::Body::wrap_stream(source.into_stream(None)),
            UploadBody::Buffer(bytes) => bytes.into(),
        };

        let start = Instant::now();
        let response = client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let stream = response.bytes_stream().map_err(Error::from).boxed();

        super::finish(status, start, ResponseBody::new(stream), mode).await
    }

    async fn close(&mut self) -> Result<()> {
        if let State::Open(_) = std::mem::replace(&mut self.state, State::Closed) {
            tracing::debug!("reqwest client released");
        }
        Ok(())
    }
}

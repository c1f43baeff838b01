//! A minimal blob-service client for setting up and comparing against the raw transports.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use url::Url;

use crate::error::{Error, Result};
use crate::pipeline::{DEFAULT_SERVICE_VERSION, SERVICE_VERSION};
use crate::transport::{self, UploadBody};

/// The result of a successful [`BlobClient::delete_blob`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The blob existed and was deleted.
    Deleted,
    /// There was no blob to delete.
    NotFound,
}

/// A client bound to a single blob URL.
#[derive(Debug, Clone)]
pub struct BlobClient {
    url: Url,
    client: reqwest::Client,
}

impl BlobClient {
    /// Creates a client for the given blob URL, with a default [`reqwest::Client`].
    ///
    /// Any query parameters on the URL, such as a SAS token, are sent with every request.
    pub fn from_blob_url(url: Url) -> Result<Self> {
        let client = transport::client_builder(None).build()?;
        Ok(Self::new(url, client))
    }

    /// Creates a client for the given blob URL that sends requests through `client`.
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    /// The URL of the blob.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deletes the blob.
    ///
    /// A missing blob is reported as [`DeleteOutcome::NotFound`] rather than an error.
    pub async fn delete_blob(&self) -> Result<DeleteOutcome> {
        let response = self
            .client
            .delete(self.url.clone())
            .header(SERVICE_VERSION, DEFAULT_SERVICE_VERSION)
            .send()
            .await?;

        let status = response.status();
        response.bytes().await?;

        match status {
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            status => Err(self.status_error(status)),
        }
    }

    /// Uploads `body` as an uncommitted block with the given id.
    ///
    /// The block id is base64 encoded as required by the service. `length` is sent as
    /// `Content-Length` and must match the body.
    pub async fn stage_block(
        &self,
        block_id: &str,
        body: UploadBody,
        length: u64,
    ) -> Result<StatusCode> {
        let actual = body.len();
        if actual != length {
            return Err(Error::ContentLength {
                declared: Some(length),
                actual,
            });
        }

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("comp", "block")
            .append_pair("blockid", &STANDARD.encode(block_id));

        let body = match body {
            UploadBody::Stream(source) => reqwest::Body::wrap_stream(source.into_stream(None)),
            UploadBody::Buffer(bytes) => bytes.into(),
        };

        let response = self
            .client
            .put(url)
            .header(SERVICE_VERSION, DEFAULT_SERVICE_VERSION)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        response.bytes().await?;

        if !status.is_success() {
            return Err(self.status_error(status));
        }
        Ok(status)
    }

    fn status_error(&self, status: StatusCode) -> Error {
        Error::Status {
            status,
            url: transport::redacted(&self.url).to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_base64() {
        assert_eq!(STANDARD.encode("block-0001"), "YmxvY2stMDAwMQ==");
    }
}

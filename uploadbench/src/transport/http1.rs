use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt, io, mem};

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http::header::HOST;
use http::{HeaderValue, Request};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use url::{Position, Url};

use super::{ResponseBody, ResponseMode, Transport, UploadBody, UploadRequest, UploadResponse};
use crate::error::{Error, Result};

type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// Either a plain TCP stream or a TLS session on top of one.
trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scheme {
    Http,
    Https,
}

/// Where the connection goes, derived from the target URL.
#[derive(Debug)]
struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
    authority: HeaderValue,
}

impl Origin {
    fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(Error::InvalidUrl {
                    message: format!("unsupported URL scheme `{other}`"),
                });
            }
        };

        let host = url.host_str().ok_or_else(|| Error::InvalidUrl {
            message: "URL has no host".into(),
        })?;
        let port = url.port_or_known_default().ok_or_else(|| Error::InvalidUrl {
            message: "URL has no port".into(),
        })?;
        let authority = HeaderValue::from_str(&url[Position::BeforeHost..Position::AfterPort])?;

        Ok(Self {
            scheme,
            host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
            port,
            authority,
        })
    }
}

/// A live HTTP/1.1 connection, driven by a background task.
struct Connection {
    sender: SendRequest<RequestBody>,
    task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum State {
    Idle,
    Open(Connection),
    Closed,
}

/// A direct HTTP/1.1 client holding exactly one persistent connection to the target origin.
///
/// The connection is established on [`open`](Transport::open) or on the first request, and
/// re-established transparently if the server closed it in between. Requests are written straight
/// to the connection without any middleware, which makes this the baseline for comparisons.
pub struct Http1Transport {
    origin: Origin,
    connect_timeout: Option<Duration>,
    tls: Option<TlsConnector>,
    state: State,
}

impl Http1Transport {
    /// Creates a transport for the origin of the given URL.
    ///
    /// Only the scheme, host and port are taken from the URL. Requests may target any path on
    /// that origin.
    pub fn new(url: &Url) -> Result<Self> {
        let origin = Origin::from_url(url)?;
        let tls = match origin.scheme {
            Scheme::Http => None,
            Scheme::Https => Some(TlsConnector::from(tls_config(default_roots())?)),
        };

        Ok(Self {
            origin,
            connect_timeout: None,
            tls,
            state: State::Idle,
        })
    }

    /// Bounds the time spent establishing a connection, including the TLS handshake.
    pub fn connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    /// Replaces the trusted root certificates used to verify the server.
    ///
    /// By default, the Mozilla root program bundled with `webpki-roots` is trusted. This has no
    /// effect on plain HTTP origins.
    pub fn with_root_certificates(mut self, roots: RootCertStore) -> Result<Self> {
        if self.origin.scheme == Scheme::Https {
            self.tls = Some(TlsConnector::from(tls_config(roots)?));
        }
        Ok(self)
    }

    /// Returns `true` if a connection is currently established.
    pub fn is_connected(&self) -> bool {
        matches!(&self.state, State::Open(connection) if !connection.sender.is_closed())
    }

    async fn connect(&self) -> Result<Connection> {
        let connect = self.handshake();
        let (sender, connection) = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(io::Error::from)??,
            None => connect.await?,
        };

        let host = self.origin.host.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(
                    error = &err as &dyn std::error::Error,
                    %host,
                    "http1 connection terminated"
                );
            }
        });

        tracing::debug!(
            host = %self.origin.host,
            port = self.origin.port,
            "http1 connection established"
        );
        Ok(Connection { sender, task })
    }

    async fn handshake(
        &self,
    ) -> Result<(
        SendRequest<RequestBody>,
        http1::Connection<TokioIo<Box<dyn Io>>, RequestBody>,
    )> {
        let tcp = TcpStream::connect((self.origin.host.as_str(), self.origin.port)).await?;
        tcp.set_nodelay(true)?;

        let io: Box<dyn Io> = match &self.tls {
            None => Box::new(tcp),
            Some(connector) => {
                let server_name =
                    ServerName::try_from(self.origin.host.clone()).map_err(|err| {
                        Error::InvalidUrl {
                            message: format!("invalid server name `{}`: {err}", self.origin.host),
                        }
                    })?;
                Box::new(connector.connect(server_name, tcp).await?)
            }
        };

        Ok(http1::handshake(TokioIo::new(io)).await?)
    }

    /// Returns a connection that is ready to accept a request, connecting if necessary.
    async fn ready(&mut self) -> Result<&mut SendRequest<RequestBody>> {
        let reconnect = match &self.state {
            State::Closed => {
                return Err(Error::Closed {
                    transport: self.name(),
                });
            }
            State::Idle => true,
            State::Open(connection) => connection.sender.is_closed(),
        };

        if reconnect {
            let connection = self.connect().await?;
            self.state = State::Open(connection);
        }

        let State::Open(connection) = &mut self.state else {
            unreachable!("connection was just established");
        };
        connection.sender.ready().await?;
        Ok(&mut connection.sender)
    }

    fn build_request(&self, request: UploadRequest) -> Result<Request<RequestBody>> {
        let mut headers = request.headers;
        if !headers.contains_key(HOST) {
            headers.insert(HOST, self.origin.authority.clone());
        }

        let body = match request.body {
            UploadBody::Stream(source) => {
                StreamBody::new(source.into_stream(None).map_ok(Frame::data)).boxed_unsync()
            }
            UploadBody::Buffer(bytes) => Full::new(bytes)
                .map_err(|never| match never {})
                .boxed_unsync(),
        };

        let mut http_request = Request::builder()
            .method(request.method)
            .uri(&request.url[Position::BeforePath..])
            .body(body)?;
        *http_request.headers_mut() = headers;

        Ok(http_request)
    }
}

impl fmt::Debug for Http1Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http1Transport")
            .field("origin", &self.origin)
            .field("connect_timeout", &self.connect_timeout)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Transport for Http1Transport {
    fn name(&self) -> &'static str {
        "http1"
    }

    async fn open(&mut self) -> Result<()> {
        self.ready().await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(url = super::redacted(&request.url)))]
    async fn send(&mut self, request: UploadRequest, mode: ResponseMode) -> Result<UploadResponse> {
        request.check_content_length()?;

        let start = Instant::now();
        let http_request = self.build_request(request)?;
        let response = self.ready().await?.send_request(http_request).await?;

        let status = response.status();
        let stream = TryStreamExt::map_err(response.into_body().into_data_stream(), Error::from);

        super::finish(status, start, ResponseBody::new(stream.boxed()), mode).await
    }

    async fn close(&mut self) -> Result<()> {
        if let State::Open(_) = mem::replace(&mut self.state, State::Closed) {
            tracing::debug!(host = %self.origin.host, "http1 connection closed");
        }
        Ok(())
    }
}

fn default_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

fn tls_config(roots: RootCertStore) -> Result<Arc<ClientConfig>> {
    let mut config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_defaults_port() {
        let url: Url = "https://account.blob.example/c/b".parse().unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.scheme, Scheme::Https);
        assert_eq!(origin.port, 443);
        assert_eq!(origin.authority, "account.blob.example");

        let url: Url = "http://127.0.0.1:10000/c/b".parse().unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.scheme, Scheme::Http);
        assert_eq!(origin.port, 10000);
        assert_eq!(origin.authority, "127.0.0.1:10000");
    }

    #[test]
    fn rejects_other_schemes() {
        let url: Url = "ftp://example.com/file".parse().unwrap();
        assert!(matches!(
            Http1Transport::new(&url),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn closed_transport_rejects_requests() {
        let url: Url = "http://127.0.0.1:1/c/b".parse().unwrap();
        let mut transport = Http1Transport::new(&url).unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let request = UploadRequest::put(url, Bytes::new()).with_content_length();
        let result = transport.send(request, ResponseMode::Buffered).await;
        assert!(matches!(result, Err(Error::Closed { transport: "http1" })));
    }
}

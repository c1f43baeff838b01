//! Exposes an in-process blob endpoint for use in integration tests.
//!
//! ```
//! use uploadbench_test::server::TestServer;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/container/blob");
//!    // upload to the URL in tests...
//! }
//! ```
//!
//! The server understands a small subset of the blob service:
//!
//! - `PUT <path>` stores a blob of the received length and answers `201 Created` with the number
//!   of received bytes as body. With `comp=block` in the query, the upload is recorded but no
//!   blob is created.
//! - `DELETE <path>` answers `202 Accepted` if the blob exists, otherwise `404 Not Found` with an
//!   error code as body.
//! - `PUT /redirect/<path>` answers `307 Temporary Redirect` pointing at `<path>`.
//! - `PUT /status/<code>/...` answers with the given status code.
//!
//! [`TestServer::with_tls`] serves the same endpoint over HTTPS with a freshly generated
//! self-signed certificate for `127.0.0.1`.

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use futures_util::StreamExt;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// A request with a body that reached the server.
#[derive(Clone, Debug)]
pub struct Upload {
    /// The request method.
    pub method: Method,
    /// The request path, without query.
    pub path: String,
    /// The raw query string, if any.
    pub query: Option<String>,
    /// All request headers.
    pub headers: HeaderMap,
    /// The number of body bytes received.
    pub len: u64,
}

#[derive(Debug, Default)]
struct Inner {
    uploads: Vec<Upload>,
    blobs: HashMap<String, u64>,
    peers: HashSet<SocketAddr>,
}

type SharedState = Arc<Mutex<Inner>>;

/// An in-process blob endpoint for use in integration tests.
///
/// It listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: SharedState,
    certificate: Option<CertificateDer<'static>>,
}

impl TestServer {
    /// Starts a new plain HTTP server on the current runtime.
    pub async fn new() -> Self {
        let (listener, socket) = bind();
        let state = SharedState::default();
        let app = Router::new().fallback(handle).with_state(state.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = app.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
            certificate: None,
        }
    }

    /// Starts a new HTTPS server on the current runtime.
    ///
    /// The server presents a self-signed certificate, available through
    /// [`certificate`](Self::certificate). Clients must trust it explicitly.
    pub async fn with_tls() -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["127.0.0.1".to_owned()]).unwrap();
        let certificate = params.self_signed(&key_pair).unwrap().der().clone();
        let key = PrivateKeyDer::try_from(key_pair.serialize_der()).unwrap();

        let config = rustls::ServerConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![certificate.clone()], key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let (listener, socket) = bind();
        let state = SharedState::default();
        let app = Router::new().fallback(handle).with_state(state.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    continue;
                };
                let acceptor = acceptor.clone();
                let service = app.clone().layer(Extension(ConnectInfo(peer)));

                tokio::spawn(async move {
                    // Clients that reject the certificate abort the handshake.
                    let Ok(stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                        .await
                        .ok();
                });
            }
        });

        Self {
            handle,
            socket,
            state,
            certificate: Some(certificate),
        }
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let scheme = match self.certificate {
            Some(_) => "https",
            None => "http",
        };
        let path = path.trim_start_matches('/');
        format!("{scheme}://127.0.0.1:{}/{}", self.socket.port(), path)
    }

    /// The self-signed certificate of a server started with [`with_tls`](Self::with_tls).
    pub fn certificate(&self) -> Option<&CertificateDer<'static>> {
        self.certificate.as_ref()
    }

    /// Returns all uploads received so far, in order.
    pub fn uploads(&self) -> Vec<Upload> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Returns the length of the blob stored at `path`, if it exists.
    pub fn blob_len(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().blobs.get(path).copied()
    }

    /// Returns the number of distinct client connections that sent requests.
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }
}

fn bind() -> (TcpListener, SocketAddr) {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(addr).unwrap();
    listener.set_nonblocking(true).unwrap();
    let socket = listener.local_addr().unwrap();
    (listener, socket)
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path = uri.path().to_owned();
    state.lock().unwrap().peers.insert(peer);

    if method == Method::DELETE {
        let removed = state.lock().unwrap().blobs.remove(&path);
        return match removed {
            Some(_) => StatusCode::ACCEPTED.into_response(),
            None => (StatusCode::NOT_FOUND, "BlobNotFound").into_response(),
        };
    }

    if method != Method::PUT {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let mut len = 0;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => len += chunk.len() as u64,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        }
    }

    if let Some(target) = path.strip_prefix("/redirect") {
        return (
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, target.to_owned())],
        )
            .into_response();
    }

    if let Some(rest) = path.strip_prefix("/status/") {
        let status = rest
            .split('/')
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return status.into_response();
    }

    let query = uri.query().map(str::to_owned);
    let is_block = query
        .as_deref()
        .is_some_and(|query| query.split('&').any(|pair| pair == "comp=block"));

    let mut inner = state.lock().unwrap();
    if !is_block {
        inner.blobs.insert(path.clone(), len);
    }
    inner.uploads.push(Upload {
        method,
        path,
        query,
        headers,
        len,
    });

    (StatusCode::CREATED, len.to_string()).into_response()
}

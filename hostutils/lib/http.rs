//! A minimal HTTP/1.1 client that speaks over a Unix domain socket.
//!
//! Each request opens its own connection. Both the PHP runtimes' admin sockets and the hostcore
//! control socket are local and low-traffic, so no pooling is attempted.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    client::conn::http1,
    header::{CONTENT_TYPE, HOST},
    Method, Request, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::net::UnixStream;

use crate::{HostutilsError, HostutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An HTTP client bound to one Unix socket path.
#[derive(Debug, Clone)]
pub struct UnixHttpClient {
    socket_path: PathBuf,
    timeout: Duration,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct UnixHttpResponse {
    /// The response status
    pub status: StatusCode,

    /// The response body
    pub body: Bytes,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UnixHttpClient {
    /// Creates a client for `socket_path` with the default timeout.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The socket this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a `GET` request.
    pub async fn get(&self, path: &str) -> HostutilsResult<UnixHttpResponse> {
        self.request(Method::GET, path, None, Bytes::new()).await
    }

    /// Sends a `POST` request with an optional content type.
    pub async fn post(
        &self,
        path: &str,
        content_type: Option<&str>,
        body: impl Into<Bytes>,
    ) -> HostutilsResult<UnixHttpResponse> {
        self.request(Method::POST, path, content_type, body.into())
            .await
    }

    /// Sends a request and buffers the whole response.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> HostutilsResult<UnixHttpResponse> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder.body(Full::new(body))?;

        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| HostutilsError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> HostutilsResult<UnixHttpResponse> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| self.http_error(source))?;

        let socket = self.socket_path.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(socket = %socket.display(), "connection closed with error: {e}");
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|source| self.http_error(source))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|source| self.http_error(source))?
            .to_bytes();

        Ok(UnixHttpResponse { status, body })
    }

    fn http_error(&self, source: hyper::Error) -> HostutilsError {
        HostutilsError::Http {
            socket: self.socket_path.clone(),
            source,
        }
    }
}

impl UnixHttpResponse {
    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true if something is accepting connections on `socket_path`.
pub async fn socket_accepts(socket_path: impl AsRef<Path>) -> bool {
    UnixStream::connect(socket_path.as_ref()).await.is_ok()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

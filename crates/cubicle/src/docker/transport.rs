//! HTTP over the Docker control socket
//!
//! [`Transport`] is the only seam between this crate and the runtime. The real
//! implementation speaks HTTP/1.1 over a Unix domain socket; tests swap in a
//! scripted fake.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
pub use hyper::Method;
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Uri};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::docker::DockerError;

/// Longest excerpt of a response body carried in an error message
const MAX_ERROR_EXCERPT: usize = 512;

/// A request body and its content type
#[derive(Debug, Clone)]
pub struct RequestBody {
    content_type: &'static str,
    bytes: Bytes,
}

impl RequestBody {
    /// Serialize `value` as a JSON body
    pub fn json<T: Serialize>(value: &T) -> Result<Self, DockerError> {
        let bytes = serde_json::to_vec(value).map_err(|e| DockerError::Request {
            path: String::new(),
            message: e.to_string(),
        })?;
        Ok(Self {
            content_type: "application/json",
            bytes: Bytes::from(bytes),
        })
    }

    /// Wrap an already built tar archive
    pub fn tar(archive: Vec<u8>) -> Self {
        Self {
            content_type: "application/x-tar",
            bytes: Bytes::from(archive),
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Raw status and body returned by the runtime
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check for a 2xx status
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self, operation: &'static str) -> Result<T, DockerError> {
        serde_json::from_slice(&self.body).map_err(|e| DockerError::Protocol {
            operation,
            message: e.to_string(),
        })
    }

    /// Human-readable reason from an error body
    ///
    /// The Engine answers errors with `{"message": "..."}`; anything else is
    /// returned as a bounded text excerpt.
    pub fn error_message(&self) -> String {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            message: String,
        }

        if let Ok(body) = serde_json::from_slice::<ErrorBody>(&self.body) {
            return body.message;
        }
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(MAX_ERROR_EXCERPT) {
            Some((end, _)) => format!("{}...", &text[..end]),
            None => text.to_owned(),
        }
    }

    /// Turn a non-success response into [`DockerError::Internal`]
    pub fn into_internal(self, operation: &'static str) -> DockerError {
        DockerError::Internal {
            operation,
            status: self.status,
            message: self.error_message(),
        }
    }
}

/// Sends requests to the container runtime
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Send `method path` with an optional body and collect the whole response
    ///
    /// Transport-level failures are returned as [`DockerError::Unavailable`];
    /// any HTTP status, including errors, is returned as a [`Response`].
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Response, DockerError>;
}

/// [`Transport`] over the Docker Engine's Unix socket
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    /// Path prefix such as `/v1.46`; empty for the daemon's default version
    version_prefix: String,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl UnixSocketTransport {
    /// Create a transport for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>, api_version: Option<&str>) -> Self {
        let version_prefix = match api_version {
            Some(version) => format!("/{}", version.trim_matches('/')),
            None => String::new(),
        };
        Self {
            socket_path: socket_path.into(),
            version_prefix,
            client: Client::unix(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn unavailable(&self, error: impl fmt::Display) -> DockerError {
        DockerError::Unavailable {
            socket: self.socket_path.clone(),
            message: error.to_string(),
        }
    }
}

impl fmt::Debug for UnixSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixSocketTransport")
            .field("socket_path", &self.socket_path)
            .field("version_prefix", &self.version_prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    #[instrument(skip(self, body), fields(socket = %self.socket_path.display()))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Response, DockerError> {
        let full_path = format!("{}{path}", self.version_prefix);
        let uri: Uri = UnixUri::new(&self.socket_path, &full_path).into();

        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, body.content_type);
                Full::new(body.bytes)
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body).map_err(|e| DockerError::Request {
            path: full_path.clone(),
            message: e.to_string(),
        })?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| self.unavailable(e))?;
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.unavailable(e))?
            .to_bytes();

        debug!(status, len = body.len(), "runtime responded");
        Ok(Response { status, body })
    }
}

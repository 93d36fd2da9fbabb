//! Image pulls and removal

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::docker::{DockerError, Method, Transport};
use crate::types::ImageRef;

/// Messages in a pull's progress stream that mean the tag does not exist
const MISSING_TAG_HINTS: [&str; 3] = ["not found", "manifest unknown", "does not exist"];

/// One line of the JSON progress stream returned by a pull
#[derive(Debug, Deserialize)]
struct PullProgress {
    #[serde(default)]
    error: Option<String>,
}

/// Pulls and removes runtime images
#[derive(Debug, Clone)]
pub struct Images {
    transport: Arc<dyn Transport>,
}

impl Images {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Pull `image` from its registry
    ///
    /// Pulling an image that is already present succeeds without changes.
    #[instrument(skip(self), fields(image = %image))]
    pub async fn pull(&self, image: &ImageRef) -> Result<(), DockerError> {
        let path = format!(
            "/images/create?fromImage={}",
            urlencoding::encode(&image.to_string())
        );
        let res = self.transport.request(Method::POST, &path, None).await?;

        match res.status {
            200 => {}
            404 => {
                return Err(DockerError::ImageNotFound {
                    image: image.to_string(),
                });
            }
            _ => return Err(res.into_internal("pull image")),
        }

        // Failures after the headers went out are reported inside the stream
        if let Some(message) = stream_error(&res.body) {
            let lower = message.to_lowercase();
            if MISSING_TAG_HINTS.iter().any(|hint| lower.contains(hint)) {
                return Err(DockerError::ImageNotFound {
                    image: image.to_string(),
                });
            }
            return Err(DockerError::Internal {
                operation: "pull image",
                status: res.status,
                message,
            });
        }

        debug!("image pulled");
        Ok(())
    }

    /// Remove `image`
    ///
    /// Fails with [`DockerError::ImageInUse`] while any container still
    /// references it. Removing an image that is already gone succeeds.
    #[instrument(skip(self), fields(image = %image))]
    pub async fn remove(&self, image: &ImageRef) -> Result<(), DockerError> {
        let path = format!(
            "/images/{}?force=false",
            urlencoding::encode(&image.to_string())
        );
        let res = self.transport.request(Method::DELETE, &path, None).await?;

        match res.status {
            200 => {
                debug!("image removed");
                Ok(())
            }
            404 => {
                debug!("image already absent");
                Ok(())
            }
            409 => Err(DockerError::ImageInUse {
                image: image.to_string(),
            }),
            _ => Err(res.into_internal("remove image")),
        }
    }

    /// Check whether `image` is present locally
    #[instrument(skip(self), fields(image = %image))]
    pub async fn exists(&self, image: &ImageRef) -> Result<bool, DockerError> {
        let path = format!("/images/{}/json", urlencoding::encode(&image.to_string()));
        let res = self.transport.request(Method::GET, &path, None).await?;

        match res.status {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(res.into_internal("inspect image")),
        }
    }

    /// Pull `image` unless it is already present
    pub async fn ensure(&self, image: &ImageRef) -> Result<(), DockerError> {
        if self.exists(image).await? {
            return Ok(());
        }
        self.pull(image).await
    }
}

/// First error message in a newline-delimited JSON progress stream
fn stream_error(body: &[u8]) -> Option<String> {
    body.split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .filter_map(|line| serde_json::from_slice::<PullProgress>(line).ok())
        .find_map(|progress| progress.error)
}

//! One-shot container lifecycle
//!
//! A [`Container`] moves through a fixed sequence of states:
//!
//! ```text
//! Created -> SourceWritten -> Started -> Exited -> Removed
//! ```
//!
//! `Removed` can be reached from any other state so cleanup always works.
//! Calling a step out of order fails before anything is sent to the runtime.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::docker::frame::{StreamKind, demux};
use crate::docker::{DockerError, Method, RequestBody, Response, Step, Transport, pack_file};
use crate::types::{ExecutionResult, ImageRef};

/// Lifecycle state of a [`Container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    SourceWritten,
    Started,
    Exited,
    Removed,
}

impl ContainerState {
    /// Check whether moving to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;

        matches!(
            (self, next),
            (Created, SourceWritten)
                | (SourceWritten, SourceWritten)
                | (SourceWritten, Started)
                | (Started, Exited)
                | (Created | SourceWritten | Started | Exited, Removed)
        )
    }

    /// Check whether this is the final state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerState::Removed)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerState::Created => "created",
            ContainerState::SourceWritten => "source written",
            ContainerState::Started => "started",
            ContainerState::Exited => "exited",
            ContainerState::Removed => "removed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    image: String,
    cmd: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id", default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaitResponse {
    #[serde(rename = "StatusCode")]
    status_code: i64,
}

/// A container created for a single execution
///
/// # Cleanup
///
/// Always call [`remove()`](Self::remove) before dropping. `Drop` only makes
/// a best-effort attempt through a spawned task when a Tokio runtime is
/// available.
#[derive(Debug)]
pub struct Container {
    id: String,
    image: String,
    state: ContainerState,
    exit_code: Option<i64>,
    transport: Arc<dyn Transport>,
}

impl Container {
    /// Create a container that will run `cmd` in `image`
    #[instrument(skip(transport, cmd), fields(image = %image))]
    pub async fn create(
        transport: Arc<dyn Transport>,
        image: &ImageRef,
        cmd: &[String],
        working_dir: Option<&str>,
    ) -> Result<Self, DockerError> {
        let body = RequestBody::json(&CreateBody {
            image: image.to_string(),
            cmd,
            working_dir,
        })?;
        let res = transport
            .request(Method::POST, "/containers/create", Some(body))
            .await?;

        let image = image.to_string();
        match res.status {
            200 | 201 => {}
            404 => return Err(DockerError::ImageNotFound { image }),
            _ => return Err(res.into_internal("create container")),
        }

        let id = match res.json::<CreateResponse>("create container") {
            Ok(CreateResponse { id: Some(id) }) if !id.is_empty() => id,
            Ok(_) => {
                return Err(DockerError::CreateFailed {
                    image,
                    message: "response has no Id".to_owned(),
                });
            }
            Err(e) => {
                return Err(DockerError::CreateFailed {
                    image,
                    message: e.to_string(),
                });
            }
        };

        debug!(%id, "container created");

        Ok(Self {
            id,
            image,
            state: ContainerState::Created,
            exit_code: None,
            transport,
        })
    }

    /// Runtime-assigned container id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Image the container was created from
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Exit code recorded by [`wait()`](Self::wait), if it has completed
    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    fn check_transition(&self, step: Step, next: ContainerState) -> Result<(), DockerError> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(DockerError::IllegalTransition {
                id: self.id.clone(),
                step,
                state: self.state,
            })
        }
    }

    fn not_found(&self) -> DockerError {
        DockerError::ContainerNotFound {
            id: self.id.clone(),
        }
    }

    /// Map a response that is neither success nor 404
    fn expect_status(
        &self,
        res: Response,
        ok: &[u16],
        operation: &'static str,
    ) -> Result<Response, DockerError> {
        if ok.contains(&res.status) {
            Ok(res)
        } else if res.status == 404 {
            Err(self.not_found())
        } else {
            Err(res.into_internal(operation))
        }
    }

    /// Upload `content` as `dest_dir/name` inside the container
    ///
    /// Must happen before [`start()`](Self::start).
    #[instrument(skip(self, content), fields(id = %self.id, len = content.len()))]
    pub async fn write_file(
        &mut self,
        name: &str,
        content: &[u8],
        dest_dir: &str,
    ) -> Result<(), DockerError> {
        self.check_transition(Step::WriteFile, ContainerState::SourceWritten)?;

        let archive = pack_file(name, content).map_err(|e| e.in_step(Step::WriteFile, &self.id))?;
        let path = format!(
            "/containers/{}/archive?path={}",
            self.id,
            urlencoding::encode(dest_dir)
        );
        self.transport
            .request(Method::PUT, &path, Some(RequestBody::tar(archive)))
            .await
            .and_then(|res| self.expect_status(res, &[200], "upload archive"))
            .map_err(|e| e.in_step(Step::WriteFile, &self.id))?;

        self.state = ContainerState::SourceWritten;
        debug!("file written");
        Ok(())
    }

    /// Start the container, optionally blocking until it exits
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn start(&mut self, wait_for_exit: bool) -> Result<(), DockerError> {
        self.check_transition(Step::Start, ContainerState::Started)?;

        let path = format!("/containers/{}/start", self.id);
        self.transport
            .request(Method::POST, &path, None)
            .await
            // 304: already started
            .and_then(|res| self.expect_status(res, &[204, 304], "start container"))
            .map_err(|e| e.in_step(Step::Start, &self.id))?;

        self.state = ContainerState::Started;
        debug!("container started");

        if wait_for_exit {
            self.wait().await?;
        }
        Ok(())
    }

    /// Block until the container's main process exits and record its code
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn wait(&mut self) -> Result<i64, DockerError> {
        self.check_transition(Step::Wait, ContainerState::Exited)?;

        let path = format!("/containers/{}/wait", self.id);
        let res = self
            .transport
            .request(Method::POST, &path, None)
            .await
            .and_then(|res| self.expect_status(res, &[200], "wait container"))
            .map_err(|e| e.in_step(Step::Wait, &self.id))?;
        let WaitResponse { status_code } = res
            .json("wait container")
            .map_err(|e| e.in_step(Step::Wait, &self.id))?;

        self.state = ContainerState::Exited;
        self.exit_code = Some(status_code);
        debug!(exit_code = status_code, "container exited");
        Ok(status_code)
    }

    /// Collect stdout and stderr with the recorded exit code
    ///
    /// Only valid after [`wait()`](Self::wait); earlier reads could miss
    /// output.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn logs(&self) -> Result<ExecutionResult, DockerError> {
        let exit_code = match (self.state, self.exit_code) {
            (ContainerState::Exited, Some(code)) => code,
            _ => {
                return Err(DockerError::IllegalTransition {
                    id: self.id.clone(),
                    step: Step::Logs,
                    state: self.state,
                });
            }
        };

        let stdout = self
            .read_stream(StreamKind::Stdout)
            .await
            .map_err(|e| e.in_step(Step::Logs, &self.id))?;
        let stderr = self
            .read_stream(StreamKind::Stderr)
            .await
            .map_err(|e| e.in_step(Step::Logs, &self.id))?;

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    async fn read_stream(&self, kind: StreamKind) -> Result<Vec<u8>, DockerError> {
        let query = match kind {
            StreamKind::Stderr => "stderr=1",
            StreamKind::Stdout | StreamKind::Stdin => "stdout=1",
        };
        let path = format!("/containers/{}/logs?{query}", self.id);
        let res = self.transport.request(Method::GET, &path, None).await?;
        let res = self.expect_status(res, &[200], "read logs")?;
        Ok(demux(&res.body)?.into_stream(kind))
    }

    /// Delete the container, killing it if it is still running
    ///
    /// Removing a container that is already gone succeeds.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn remove(&mut self) -> Result<(), DockerError> {
        if self.state.is_terminal() {
            return Ok(());
        }

        let path = format!("/containers/{}?force=true", self.id);
        let res = self
            .transport
            .request(Method::DELETE, &path, None)
            .await
            .map_err(|e| e.in_step(Step::Remove, &self.id))?;

        match res.status {
            200 | 204 => debug!("container removed"),
            404 => debug!("container already gone"),
            _ => {
                return Err(res
                    .into_internal("remove container")
                    .in_step(Step::Remove, &self.id));
            }
        }

        self.state = ContainerState::Removed;
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        warn!(
            id = %self.id,
            state = %self.state,
            "Container dropped without remove(); attempting best-effort removal"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(id = %self.id, "no runtime available, container leaked");
            return;
        };
        let transport = Arc::clone(&self.transport);
        let path = format!("/containers/{}?force=true", self.id);
        let id = self.id.clone();
        handle.spawn(async move {
            match transport.request(Method::DELETE, &path, None).await {
                Ok(res) if res.is_success() || res.status == 404 => {
                    debug!(%id, "best-effort removal succeeded");
                }
                Ok(res) => warn!(%id, status = res.status, "best-effort removal failed"),
                Err(e) => warn!(%id, error = %e, "best-effort removal failed"),
            }
        });
    }
}

//! Execution step for code running
//!
//! Drives one container from creation to removal. Removal runs on every exit
//! path once the container exists.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::docker::{Container, Images, Transport};
use crate::runner::ExecuteError;
use crate::types::{ExecutionResult, ImageRef};

/// Everything one execution needs, owned so it can move onto its own task
#[derive(Debug)]
pub(crate) struct Job {
    pub transport: Arc<dyn Transport>,
    pub image: ImageRef,
    pub cmd: Vec<String>,
    pub code: String,
    pub source_name: String,
    pub source_dir: String,
    pub timeout: Option<Duration>,
    pub pull_missing: bool,
}

impl Job {
    #[instrument(skip(self), fields(image = %self.image))]
    pub async fn run(self) -> Result<ExecutionResult, ExecuteError> {
        if self.pull_missing {
            Images::new(Arc::clone(&self.transport))
                .ensure(&self.image)
                .await?;
        }

        let mut container = Container::create(
            Arc::clone(&self.transport),
            &self.image,
            &self.cmd,
            Some(&self.source_dir),
        )
        .await?;

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(&mut container))
                .await
                .unwrap_or_else(|_| {
                    warn!(id = %container.id(), ?limit, "execution timed out");
                    Err(ExecuteError::Timeout {
                        seconds: limit.as_secs_f64(),
                    })
                }),
            None => self.drive(&mut container).await,
        };

        if let Err(e) = container.remove().await {
            warn!(id = %container.id(), error = %e, "failed to remove container");
        }

        outcome
    }

    /// Write the source, run the program, collect its output
    async fn drive(&self, container: &mut Container) -> Result<ExecutionResult, ExecuteError> {
        container
            .write_file(&self.source_name, self.code.as_bytes(), &self.source_dir)
            .await?;
        container.start(true).await?;
        let result = container.logs().await?;

        debug!(
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "execution finished"
        );
        Ok(result)
    }
}

//! Render-job execution engine.
//!
//! One job is one invocation of the external headless browser: build the
//! flag list, acquire an isolated workspace, run the process under a hard
//! deadline, extract the artifact, release the workspace. Stages are
//! strictly sequential and never retried; the workspace is released on
//! every exit path once acquired.

mod args;
mod extract;
mod process;
pub mod types;
mod workspace;

pub use types::{Artifact, RenderAction, RenderPolicy, RenderRequest};

use std::{
    io,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infra::telemetry::{
    METRIC_RENDER_DURATION_MS, METRIC_RENDER_FAILURES_TOTAL, METRIC_RENDER_JOBS_TOTAL,
};

use workspace::Workspace;

const SOURCE: &str = "application::render::RenderService";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target must not be empty")]
    EmptyTarget,
    #[error("failed to prepare workspace: {0}")]
    Workspace(io::Error),
    #[error("failed to run renderer: {0}")]
    Spawn(io::Error),
    #[error("renderer exited with status {exit_code:?}: {stderr}")]
    Renderer {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("renderer exceeded the {}s deadline", .after.as_secs())]
    Timeout { after: Duration },
    #[error("renderer exited cleanly but produced no {file}")]
    ArtifactMissing { file: &'static str },
}

impl RenderError {
    pub(crate) fn stage(&self) -> &'static str {
        match self {
            Self::EmptyTarget => "validate",
            Self::Workspace(_) => "workspace",
            Self::Spawn(_) => "spawn",
            Self::Renderer { .. } => "renderer",
            Self::Timeout { .. } => "timeout",
            Self::ArtifactMissing { .. } => "artifact",
        }
    }
}

/// Executes render jobs against the configured headless browser.
///
/// The service holds only the immutable process-wide policy, so a single
/// instance is shared across all in-flight requests without synchronization.
#[derive(Debug, Clone)]
pub struct RenderService {
    policy: RenderPolicy,
}

impl RenderService {
    pub fn new(policy: RenderPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RenderPolicy {
        &self.policy
    }

    /// Run one render job to completion and return its artifact.
    pub async fn render(
        &self,
        action: RenderAction,
        request: RenderRequest,
    ) -> Result<Artifact, RenderError> {
        let started_at = Instant::now();

        // Validate before any filesystem or process resource is acquired.
        if request.target.trim().is_empty() {
            counter!(METRIC_RENDER_FAILURES_TOTAL, "stage" => "validate").increment(1);
            return Err(RenderError::EmptyTarget);
        }

        counter!(METRIC_RENDER_JOBS_TOTAL, "action" => action.as_str()).increment(1);

        let render_args = args::build_args(action, &request, &self.policy);
        debug!(
            target = SOURCE,
            op = "render",
            action = action.as_str(),
            args = ?render_args,
            "invoking renderer"
        );

        let workspace = match Workspace::acquire() {
            Ok(workspace) => workspace,
            Err(err) => {
                counter!(METRIC_RENDER_FAILURES_TOTAL, "stage" => "workspace").increment(1);
                return Err(RenderError::Workspace(err));
            }
        };

        let result = self.run_job(action, &render_args, &workspace).await;
        workspace.release();

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_DURATION_MS, "action" => action.as_str()).record(elapsed_ms);

        match &result {
            Ok(artifact) => {
                info!(
                    target = SOURCE,
                    op = "render",
                    result = "ok",
                    action = action.as_str(),
                    elapsed_ms = elapsed_ms as u64,
                    artifact_bytes = artifact.bytes.len(),
                    "render job completed"
                );
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILURES_TOTAL, "stage" => err.stage()).increment(1);
                warn!(
                    target = SOURCE,
                    op = "render",
                    result = "error",
                    action = action.as_str(),
                    elapsed_ms = elapsed_ms as u64,
                    error = %err,
                    "render job failed"
                );
            }
        }

        result
    }

    async fn run_job(
        &self,
        action: RenderAction,
        render_args: &[String],
        workspace: &Workspace,
    ) -> Result<Artifact, RenderError> {
        let output =
            process::run_renderer(&self.policy, workspace, render_args, process::JOB_DEADLINE)
                .await?;

        if self.policy.debug {
            debug!(
                target = SOURCE,
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "renderer output streams"
            );
        }

        extract::read_artifact(action, workspace.work_dir(), output.stdout).await
    }
}

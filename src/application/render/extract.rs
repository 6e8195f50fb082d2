use std::{io::ErrorKind, path::Path};

use super::{
    RenderError,
    types::{Artifact, RenderAction},
};

/// Locate and read the artifact the renderer produced for `action`.
///
/// Screenshots and PDFs land as fixed-name files in the working directory;
/// a DOM dump is whatever the renderer streamed to standard output.
pub(crate) async fn read_artifact(
    action: RenderAction,
    work_dir: &Path,
    stdout: Vec<u8>,
) -> Result<Artifact, RenderError> {
    let Some(file) = action.artifact_file() else {
        return Ok(Artifact {
            bytes: stdout.into(),
            content_type: action.content_type(),
        });
    };

    let path = work_dir.join(file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Artifact {
            bytes: bytes.into(),
            content_type: action.content_type(),
        }),
        // A clean renderer exit without the expected file usually means the
        // virtual time budget ran out before the page settled.
        Err(err) if err.kind() == ErrorKind::NotFound => {
            Err(RenderError::ArtifactMissing { file })
        }
        Err(err) => Err(RenderError::Workspace(err)),
    }
}

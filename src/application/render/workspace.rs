use std::{io, path::Path};

use tempfile::{Builder, TempDir};
use tracing::warn;

const SOURCE: &str = "application::render::workspace";

/// Isolated per-job filesystem area: the directory the renderer runs in plus
/// a private temp root bound to the child's temp environment. Chromium
/// scatters profile and cache files into whatever the temp variables point
/// at; giving every job its own root keeps concurrent jobs apart and makes
/// cleanup exhaustive.
#[derive(Debug)]
pub(crate) struct Workspace {
    work: TempDir,
    temp_root: TempDir,
}

impl Workspace {
    /// Create both directories, each with a collision-resistant random suffix.
    pub(crate) fn acquire() -> io::Result<Self> {
        let work = Builder::new().prefix("render-").tempdir()?;
        let temp_root = Builder::new().prefix("render-tmp-").tempdir()?;
        Ok(Self { work, temp_root })
    }

    pub(crate) fn work_dir(&self) -> &Path {
        self.work.path()
    }

    pub(crate) fn temp_root(&self) -> &Path {
        self.temp_root.path()
    }

    /// Remove both directory trees. Removal failures are logged and
    /// swallowed: a stuck directory must not change the outcome of a job
    /// that already succeeded or failed on its own terms. Dropping a
    /// workspace without calling this performs the same cleanup silently,
    /// which covers panics and early returns.
    pub(crate) fn release(self) {
        for (label, dir) in [("work", self.work), ("temp_root", self.temp_root)] {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(
                    target = SOURCE,
                    dir = label,
                    path = %path.display(),
                    error = %err,
                    "failed to remove workspace directory"
                );
            }
        }
    }
}

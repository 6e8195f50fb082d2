use std::path::PathBuf;

use bytes::Bytes;

use crate::config::RenderSettings;

/// What the renderer is asked to produce for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAction {
    Screenshot,
    Pdf,
    Dom,
}

impl RenderAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Pdf => "pdf",
            Self::Dom => "dom",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Screenshot => "image/png",
            Self::Pdf => "application/pdf",
            Self::Dom => "text/plain",
        }
    }

    /// Fixed file name the renderer writes into its working directory, or
    /// `None` when the artifact arrives on standard output instead.
    pub(crate) const fn artifact_file(self) -> Option<&'static str> {
        match self {
            Self::Screenshot => Some("screenshot.png"),
            Self::Pdf => Some("output.pdf"),
            Self::Dom => None,
        }
    }

    pub(crate) const fn output_flags(self) -> &'static [&'static str] {
        match self {
            Self::Screenshot => &["--screenshot"],
            Self::Pdf => &["--print-to-pdf", "--no-pdf-header-footer"],
            Self::Dom => &["--dump-dom"],
        }
    }
}

/// One unit of render work. The target is either a URL or an absolute path
/// to a local HTML file.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub target: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub user_agent: Option<String>,
}

/// Process-wide render policy, fixed at startup and applied to every job.
#[derive(Debug, Clone)]
pub struct RenderPolicy {
    pub browser_path: PathBuf,
    pub ignore_cert_errors: bool,
    pub disable_sandbox: bool,
    pub proxy: Option<String>,
    pub debug: bool,
}

impl From<&RenderSettings> for RenderPolicy {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            browser_path: settings.browser_path.clone(),
            ignore_cert_errors: settings.ignore_cert_errors,
            disable_sandbox: settings.disable_sandbox,
            proxy: settings.proxy.clone(),
            debug: settings.debug,
        }
    }
}

/// The output payload of a completed render job.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

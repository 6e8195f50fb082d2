use std::{io, process::Stdio, time::Duration};

use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    time,
};
use tracing::warn;

use super::{
    RenderError,
    types::RenderPolicy,
    workspace::Workspace,
};

/// Hard wall-clock ceiling for one renderer invocation.
pub(crate) const JOB_DEADLINE: Duration = Duration::from_secs(60);

const STDERR_CAPTURE_LIMIT: usize = 8 * 1024;
const SOURCE: &str = "application::render::process";

#[derive(Debug)]
pub(crate) struct RendererOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run the renderer inside `workspace` and capture both output streams.
///
/// The child runs with the workspace working directory as its cwd and with
/// every conventional temp variable pointed at the workspace temp root, so
/// all scratch files it scatters stay inside the workspace. Whatever the
/// outcome — success, failure, or deadline expiry — the child is terminated
/// before this function returns. `kill_on_drop` covers the remaining path
/// where the whole job future is dropped because the caller went away.
pub(crate) async fn run_renderer(
    policy: &RenderPolicy,
    workspace: &Workspace,
    args: &[String],
    deadline: Duration,
) -> Result<RendererOutput, RenderError> {
    let mut child = Command::new(&policy.browser_path)
        .args(args)
        .current_dir(workspace.work_dir())
        .env("TMPDIR", workspace.temp_root())
        .env("TEMP", workspace.temp_root())
        .env("TMP", workspace.temp_root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(RenderError::Spawn)?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| RenderError::Spawn(io::Error::other("renderer stdout was not captured")))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::Spawn(io::Error::other("renderer stderr was not captured")))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let wait = async {
        let (out, err, status) = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout),
            stderr_pipe.read_to_end(&mut stderr),
            child.wait(),
        );
        out?;
        err?;
        status
    };

    let status = match time::timeout(deadline, wait).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            terminate(&mut child).await;
            return Err(RenderError::Spawn(err));
        }
        Err(_elapsed) => {
            terminate(&mut child).await;
            return Err(RenderError::Timeout { after: deadline });
        }
    };

    // Headless Chromium is known to leave helper processes lingering even
    // after the main process exits cleanly; terminate unconditionally once
    // the results are captured.
    terminate(&mut child).await;

    if !status.success() {
        return Err(RenderError::Renderer {
            exit_code: status.code(),
            stderr: truncate(&String::from_utf8_lossy(&stderr), STDERR_CAPTURE_LIMIT),
        });
    }

    Ok(RendererOutput { stdout, stderr })
}

/// Force-terminate the child and wait until the OS has reaped it. Failures
/// are logged, never escalated: the job outcome is already decided by the
/// time this runs.
async fn terminate(child: &mut Child) {
    match child.start_kill() {
        Ok(()) => {
            if let Err(err) = child.wait().await {
                warn!(target = SOURCE, error = %err, "failed to reap terminated renderer");
            }
        }
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
            // Already exited and reaped.
        }
        Err(err) => {
            warn!(target = SOURCE, error = %err, "failed to terminate renderer");
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &text[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    use tempfile::TempDir;

    use super::*;

    fn fake_renderer(dir: &Path, script: &str) -> std::path::PathBuf {
        let path = dir.join("fake-renderer");
        fs::write(&path, script).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn policy_for(script: std::path::PathBuf) -> RenderPolicy {
        RenderPolicy {
            browser_path: script,
            ignore_cert_errors: true,
            disable_sandbox: false,
            proxy: None,
            debug: false,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let dir = TempDir::new().expect("temp dir");
        let script = fake_renderer(
            dir.path(),
            "#!/bin/sh\nprintf 'document body'\nprintf 'diagnostic noise' >&2\n",
        );
        let workspace = Workspace::acquire().expect("workspace");

        let output = run_renderer(
            &policy_for(script),
            &workspace,
            &[],
            Duration::from_secs(5),
        )
        .await
        .expect("renderer output");

        assert_eq!(output.stdout, b"document body");
        assert_eq!(output.stderr, b"diagnostic noise");
        workspace.release();
    }

    #[tokio::test]
    async fn binds_working_directory_and_temp_root() {
        let dir = TempDir::new().expect("temp dir");
        let script = fake_renderer(dir.path(), "#!/bin/sh\npwd\nprintf '%s\\n' \"$TMPDIR\"\n");
        let workspace = Workspace::acquire().expect("workspace");

        let output = run_renderer(
            &policy_for(script),
            &workspace,
            &[],
            Duration::from_secs(5),
        )
        .await
        .expect("renderer output");

        let text = String::from_utf8(output.stdout).expect("utf8");
        let mut lines = text.lines();
        let cwd = lines.next().expect("cwd line");
        let tmp = lines.next().expect("tmp line");

        assert_eq!(
            fs::canonicalize(cwd).expect("canonical cwd"),
            fs::canonicalize(workspace.work_dir()).expect("canonical work dir")
        );
        assert_eq!(
            fs::canonicalize(tmp).expect("canonical tmp"),
            fs::canonicalize(workspace.temp_root()).expect("canonical temp root")
        );
        workspace.release();
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_captured_stderr() {
        let dir = TempDir::new().expect("temp dir");
        let script = fake_renderer(dir.path(), "#!/bin/sh\necho 'renderer blew up' >&2\nexit 9\n");
        let workspace = Workspace::acquire().expect("workspace");

        let err = run_renderer(
            &policy_for(script),
            &workspace,
            &[],
            Duration::from_secs(5),
        )
        .await
        .expect_err("expected renderer failure");

        match err {
            RenderError::Renderer { exit_code, stderr } => {
                assert_eq!(exit_code, Some(9));
                assert!(stderr.contains("renderer blew up"), "stderr: {stderr}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
        workspace.release();
    }

    #[tokio::test]
    async fn deadline_expiry_kills_the_process_before_returning() {
        let dir = TempDir::new().expect("temp dir");
        let pid_file = dir.path().join("renderer.pid");
        let script = fake_renderer(
            dir.path(),
            &format!("#!/bin/sh\necho $$ > \"{}\"\nexec sleep 100\n", pid_file.display()),
        );
        let workspace = Workspace::acquire().expect("workspace");

        let err = run_renderer(
            &policy_for(script),
            &workspace,
            &[],
            Duration::from_millis(250),
        )
        .await
        .expect_err("expected timeout");

        assert!(matches!(err, RenderError::Timeout { .. }), "got {err:?}");

        let pid = fs::read_to_string(&pid_file).expect("pid file").trim().to_string();
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid])
            .status()
            .expect("signal probe")
            .success();
        assert!(!alive, "renderer pid {pid} still running after timeout");
        workspace.release();
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let workspace = Workspace::acquire().expect("workspace");
        let err = run_renderer(
            &policy_for("/nonexistent/renderer".into()),
            &workspace,
            &[],
            Duration::from_secs(1),
        )
        .await
        .expect_err("expected spawn failure");

        assert!(matches!(err, RenderError::Spawn(_)), "got {err:?}");
        workspace.release();
    }

    #[test]
    fn truncate_limits_output() {
        let long = "a".repeat(3000);
        let truncated = truncate(&long, 1000);
        assert!(truncated.len() > 1000);
        assert!(truncated.ends_with("… (truncated)"));
        assert_eq!(truncate("short", 1000), "short");
    }
}

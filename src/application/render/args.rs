//! Translates a render request and policy into the renderer's flag list.
//!
//! Switch reference:
//! https://source.chromium.org/chromium/chromium/src/+/main:headless/app/headless_shell_switches.cc

use super::types::{RenderAction, RenderPolicy, RenderRequest};

/// Cap on the renderer's internal virtual clock. Kept strictly below the job
/// deadline so a page that never settles makes the renderer exit on its own
/// before the hard kill fires.
pub(crate) const VIRTUAL_TIME_BUDGET_MS: u32 = 55_000;

pub(crate) fn build_args(
    action: RenderAction,
    request: &RenderRequest,
    policy: &RenderPolicy,
) -> Vec<String> {
    let mut args = vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--disable-software-rasterizer".to_string(),
        format!("--virtual-time-budget={VIRTUAL_TIME_BUDGET_MS}"),
        "--disable-dev-shm-usage".to_string(),
        "--hide-scrollbars".to_string(),
        "--disable-crash-reporter".to_string(),
        "--block-new-web-contents".to_string(),
    ];

    if let (Some(width), Some(height)) = (request.width, request.height) {
        if width > 0 && height > 0 {
            args.push(format!("--window-size={width},{height}"));
        }
    }

    if policy.debug {
        args.push("--enable-logging".to_string());
        args.push("--v=1".to_string());
    }

    if policy.ignore_cert_errors {
        args.push("--ignore-certificate-errors".to_string());
    }

    if policy.disable_sandbox {
        args.push("--no-sandbox".to_string());
    }

    if let Some(proxy) = policy.proxy.as_deref() {
        args.push(format!("--proxy-server={proxy}"));
    }

    if let Some(agent) = request.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
        args.push(format!("--user-agent={agent}"));
    }

    for flag in action.output_flags() {
        args.push((*flag).to_string());
    }

    // The target is always the final positional argument.
    args.push(request.target.clone());

    args
}

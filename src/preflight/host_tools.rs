//! Host tool availability checks.

use super::types::CheckResult;

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    let mut results = Vec::new();

    // Required tools with install hints
    let required_tools = [
        ("git", "Required to clone the boot firmware"),
        ("xz", "Required to pack the initramfs"),
        ("cpio", "Required to pack the initramfs"),
    ];

    for (tool, purpose) in required_tools {
        results.push(check_tool_exists(tool, purpose, true));
    }

    // diskutil ships with macOS; elsewhere only generate/validate work.
    if cfg!(target_os = "macos") {
        results.push(check_tool_exists(
            "diskutil",
            "Required to format the installer drive",
            true,
        ));
    } else {
        results.push(CheckResult::warn(
            "diskutil",
            "Not on macOS: 'install' is unavailable, 'generate' and 'validate' still work",
        ));
    }

    // Optional tools
    results.push(check_tool_exists(
        "ssh-keygen",
        "Used to probe SSH key passphrases",
        false,
    ));

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.to_string_lossy()),
        Err(_) => {
            let msg = format!("Not found in PATH. {}", purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

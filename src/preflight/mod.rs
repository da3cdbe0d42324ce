//! Host readiness checks, run before anything touches a disk.

mod environment;
mod host_tools;
mod types;

pub use types::{CheckReport, CheckResult, CheckStatus};

use anyhow::{bail, Result};

use crate::config::Config;

/// Run all preflight checks and collect a report.
pub fn run_preflight(config: &Config) -> CheckReport {
    let mut checks = Vec::new();
    checks.extend(host_tools::check_host_tools());
    checks.extend(environment::check_environment(config));
    CheckReport { checks }
}

/// Run preflight and fail with a summary if any check failed.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    if !report.all_passed() {
        report.print("Preflight checks");
        bail!(
            "{} preflight check(s) failed. Fix the issues above and retry.",
            report.fail_count()
        );
    }
    Ok(())
}

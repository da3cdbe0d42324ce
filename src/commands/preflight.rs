//! Preflight command - runs host readiness checks.

use anyhow::Result;

use crate::config::Config;
use crate::preflight::run_preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    let report = run_preflight(config);
    report.print("Preflight checks");

    if strict && !report.all_passed() {
        std::process::exit(1);
    }
    if report.all_passed() {
        println!("Ready to build installer media.");
    } else {
        println!("Fix the failures above before 'pimedia install'.");
    }
    Ok(())
}

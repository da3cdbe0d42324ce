//! Clean command - cleans build artifacts.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Clean build outputs (staged media tree, initramfs)
    Outputs,
    /// Clean downloaded files (image, busybox, firmware clone)
    Downloads,
    /// Clean everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Outputs => clean::clean_outputs(config),
        CleanTarget::Downloads => clean::clean_downloads(config),
        CleanTarget::All => clean::clean_all(config),
    }
}

//! Validate command - checks an assembled media tree.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::validate::validate_media;

/// Execute the validate command.
///
/// Without `--path`, validates the staged tree under `output/media-root`.
/// Point `--path` at the mounted volume to check actual installer media.
pub fn cmd_validate(config: &Config, path: Option<&Path>, parallel: bool) -> Result<()> {
    let media_root: PathBuf = match path {
        Some(p) => p.to_path_buf(),
        None => config.media_root(),
    };
    if !media_root.exists() {
        bail!(
            "Nothing to validate at {}. Run 'pimedia generate' first.",
            media_root.display()
        );
    }

    let report = validate_media(&media_root, parallel)?;
    report.print(&format!("Validation of {}", media_root.display()));

    if !report.all_passed() {
        bail!("{} validation check(s) failed.", report.fail_count());
    }
    Ok(())
}

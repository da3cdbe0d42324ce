//! Install command - writes the staged tree onto an external disk.

use anyhow::{bail, Context, Result};
use std::io::Write;

use crate::config::Config;
use crate::download::file_sha256;
use crate::preflight::run_preflight_or_fail;
use crate::{diskutil, media};

/// Execute the install command.
///
/// Erasing is destructive, so disk selection is strict: exactly one
/// external disk, or an explicit `--disk`, and a typed confirmation
/// unless `--yes`.
pub fn cmd_install(config: &Config, requested_disk: Option<&str>, yes: bool) -> Result<()> {
    run_preflight_or_fail(config)?;

    let media_root = config.media_root();
    if !media_root.join(media::MANIFEST_FILENAME).exists() {
        bail!(
            "No staged media at {}. Run 'pimedia generate' first.",
            media_root.display()
        );
    }

    let image_path = config.image_path();
    if !image_path.exists() {
        bail!(
            "Image not found at {}. Run 'pimedia download' first.",
            image_path.display()
        );
    }

    let disks = diskutil::list_external_disks()?;
    let disk = diskutil::select_disk(&disks, requested_disk)?;

    println!("Installer drive: {}", disk.describe());
    if !yes {
        confirm_erase(&disk)?;
    }

    diskutil::erase_fat32(&disk, &config.volume_label)?;
    let volume = diskutil::ensure_mounted(&disk)?;
    println!("Volume mounted at {}", volume.display());

    println!("Copying staged media tree...");
    media::copy_tree(&media_root, &volume)?;
    media::copy_image(&image_path, &volume)?;

    println!("Checksumming image...");
    let sha = file_sha256(&image_path)?;
    let manifest = media::collect_manifest(&volume, config, Some(sha))?;
    manifest.save(&volume)?;

    println!("Ejecting {}...", disk.device_path());
    diskutil::eject(&disk)?;

    println!("\nInstaller media ready.");
    println!("  Volume:  {}", config.volume_label);
    println!("  OS:      {}", manifest.os);
    println!("  Target:  {} (flashed on first boot)", manifest.target_device);
    println!("\nBoot the Pi 5 from this drive; it powers off when done.");
    Ok(())
}

/// Require the user to type the disk identifier back before erasing.
fn confirm_erase(disk: &crate::diskutil::DiskInfo) -> Result<()> {
    print!(
        "This will ERASE {} completely. Type '{}' to continue: ",
        disk.device_path(),
        disk.identifier
    );
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    if answer.trim() != disk.identifier {
        bail!("Aborted, nothing was written.");
    }
    Ok(())
}

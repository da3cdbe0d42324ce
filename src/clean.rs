//! Build artifact cleaning.

use anyhow::Result;
use std::fs;

use crate::config::Config;
use crate::initramfs::INITRAMFS_FILENAME;

/// Clean all build outputs (preserves downloads).
pub fn clean_outputs(config: &Config) -> Result<()> {
    let output_dir = config.output_dir();
    let mut cleaned = false;

    let media_root = config.media_root();
    if media_root.exists() {
        println!("Removing staged media tree...");
        fs::remove_dir_all(&media_root)?;
        cleaned = true;
    }

    let initramfs = output_dir.join(INITRAMFS_FILENAME);
    if initramfs.exists() {
        println!("Removing initramfs.img...");
        fs::remove_file(&initramfs)?;
        cleaned = true;
    }

    let staging = output_dir.join("initramfs-root");
    if staging.exists() {
        println!("Removing initramfs staging directory...");
        fs::remove_dir_all(&staging)?;
        cleaned = true;
    }

    if output_dir.exists() && output_dir.read_dir()?.next().is_none() {
        fs::remove_dir(&output_dir)?;
    }

    if cleaned {
        println!("Clean complete (downloads preserved).");
    } else {
        println!("No outputs to clean.");
    }
    Ok(())
}

/// Clean downloaded files (OS image, busybox, firmware clone).
pub fn clean_downloads(config: &Config) -> Result<()> {
    let downloads_dir = &config.downloads_dir;

    if downloads_dir.exists() {
        println!(
            "Removing downloads directory {} (image and firmware clone)...",
            downloads_dir.display()
        );
        fs::remove_dir_all(downloads_dir)?;
        println!("Downloads cleaned.");
    } else {
        println!("No downloads to clean.");
    }

    Ok(())
}

/// Clean everything (downloads + outputs).
pub fn clean_all(config: &Config) -> Result<()> {
    clean_downloads(config)?;
    clean_outputs(config)?;
    println!("\nFull clean complete.");
    Ok(())
}

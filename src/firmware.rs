//! Raspberry Pi boot firmware handling.
//!
//! The Pi 5 firmware loads the kernel, device tree, and initramfs from
//! the FAT32 media directly; a shallow clone of the firmware repository
//! provides the boot files and we generate `config.txt`/`cmdline.txt`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

use crate::common::files::copy_file_with_dirs;
use crate::download;
use crate::initramfs::INITRAMFS_FILENAME;

/// Boot files the Pi 5 needs from the firmware repo's `boot/` directory.
pub const BOOT_FILES: &[&str] = &["kernel_2712.img", "bcm2712-rpi-5-b.dtb"];

/// Shallow clone of the firmware repository. Large even at depth 1.
pub async fn clone_firmware(url: &str, dest: &Path) -> Result<()> {
    if dest.join("boot").exists() {
        println!("Firmware already cloned at {}", dest.display());
        return Ok(());
    }
    println!("Cloning firmware from {}...", url);
    download::git_clone(url, dest, true, Duration::from_secs(1200)).await?;
    println!("Firmware cloned to {}", dest.display());
    Ok(())
}

/// Copy the Pi 5 boot set (kernel, device tree, overlays) into `dest`.
pub fn stage_boot_files(firmware_dir: &Path, dest: &Path) -> Result<()> {
    let boot = firmware_dir.join("boot");
    if !boot.exists() {
        bail!(
            "Firmware boot directory not found at {}. Run 'pimedia download firmware' first.",
            boot.display()
        );
    }

    for file in BOOT_FILES {
        let src = boot.join(file);
        if !src.exists() {
            bail!("Firmware file missing: {}", src.display());
        }
        copy_file_with_dirs(&src, &dest.join(file))
            .with_context(|| format!("Failed to copy {}", src.display()))?;
    }

    // Device tree overlays keep their relative layout.
    let overlays = boot.join("overlays");
    if overlays.exists() {
        for entry in WalkDir::new(&overlays).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&boot)
                .context("overlay path outside boot directory")?;
            copy_file_with_dirs(entry.path(), &dest.join(rel))?;
        }
    }

    println!("Boot firmware staged to {}", dest.display());
    Ok(())
}

/// `config.txt` for the installer media.
pub fn render_config_txt() -> String {
    format!(
        "\
# Raspberry Pi 5 installer boot configuration
arm_64bit=1
kernel=kernel_2712.img
initramfs {} followkernel
enable_uart=1
",
        INITRAMFS_FILENAME
    )
}

/// `cmdline.txt` for the installer media. `rdinit=/init` keeps the kernel
/// from trying to mount a real root filesystem.
pub fn render_cmdline_txt() -> String {
    "console=serial0,115200 console=tty1 rdinit=/init\n".to_string()
}

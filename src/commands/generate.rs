//! Generate command - stages the media tree and packs the initramfs.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::config::Config;
use crate::initramfs::{self, INITRAMFS_FILENAME};
use crate::partition::ReservePolicy;
use crate::preflight::run_preflight_or_fail;
use crate::scripts::init::render_init_script;
use crate::{firmware, media};

/// Execute the generate command.
///
/// Assembles everything except the OS image under `output/media-root`:
/// boot firmware, the packed initramfs, setup scripts, boot config,
/// credentials, and the manifest. `install` copies this tree (plus the
/// image) onto the actual disk.
pub fn cmd_generate(config: &Config, policy: &ReservePolicy) -> Result<()> {
    // The packing pipeline needs xz and cpio on the host; catch that
    // before clearing the previously staged tree.
    run_preflight_or_fail(config)?;

    let media_root = config.media_root();
    let output_dir = config.output_dir();

    let busybox = initramfs::busybox_path(&config.downloads_dir);
    if !busybox.exists() {
        bail!(
            "busybox not found at {}. Run 'pimedia download' first.",
            busybox.display()
        );
    }
    if !config.firmware_dir().join("boot").exists() {
        bail!(
            "Firmware not cloned at {}. Run 'pimedia download' first.",
            config.firmware_dir().display()
        );
    }

    if media_root.exists() {
        fs::remove_dir_all(&media_root)
            .with_context(|| format!("Failed to clear {}", media_root.display()))?;
    }
    fs::create_dir_all(&media_root)?;

    println!("Staging generated files...");
    media::stage_generated(&media_root, config, policy)?;

    println!("Staging boot firmware...");
    firmware::stage_boot_files(&config.firmware_dir(), &media_root)?;

    println!("Building initramfs...");
    let init = render_init_script(&config.volume_label, &config.target_device);
    let image = initramfs::build_initramfs(
        &output_dir,
        &busybox,
        &init,
        config.tools_dir().as_deref(),
    )?;
    fs::copy(&image, media_root.join(INITRAMFS_FILENAME))
        .context("Failed to copy initramfs onto media tree")?;

    // No image hash yet; install fills it in when the image is copied.
    let manifest = media::collect_manifest(&media_root, config, None)?;
    manifest.save(&media_root)?;

    println!("\nMedia tree staged at {}", media_root.display());
    println!("  OS:     {}", manifest.os);
    println!("  Image:  {} (copied during install)", manifest.image_name);
    println!("  Target: {}", manifest.target_device);
    println!("\nNext: 'pimedia install' with the installer drive attached.");
    Ok(())
}

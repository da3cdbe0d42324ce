//! Download command - fetches the OS image, busybox, and boot firmware.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::download::{self, DownloadOptions};
use crate::{firmware, initramfs};

/// Download target for the download command.
pub enum DownloadTarget {
    /// Download everything the build needs
    All,
    /// Download the OS image
    Image,
    /// Download the static busybox for the initramfs
    Busybox,
    /// Clone the Raspberry Pi boot firmware
    Firmware,
}

/// Execute the download command.
pub fn cmd_download(config: &Config, target: DownloadTarget) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        match target {
            DownloadTarget::All => {
                println!("Fetching all build inputs...\n");
                download_image(config).await?;
                download_busybox(config).await?;
                firmware::clone_firmware(&config.firmware_git_url, &config.firmware_dir()).await?;
                println!("\nAll build inputs present.");
            }
            DownloadTarget::Image => download_image(config).await?,
            DownloadTarget::Busybox => download_busybox(config).await?,
            DownloadTarget::Firmware => {
                firmware::clone_firmware(&config.firmware_git_url, &config.firmware_dir()).await?;
            }
        }
        Ok(())
    })
}

async fn download_image(config: &Config) -> Result<()> {
    let source = config.image_source();
    let dest = config.image_path();

    if dest.exists() {
        println!("Image already downloaded: {}", dest.display());
        return Ok(());
    }
    if source.url.is_empty() {
        bail!(
            "'{}' is not in the catalog; set PIMEDIA_IMAGE_URL to download it.",
            source.filename
        );
    }

    download::check_disk_space(
        dest.parent().unwrap_or(&config.downloads_dir),
        source.approx_bytes,
    )?;

    println!("Downloading {}...", source.filename);
    download::http(
        &source.url,
        &dest,
        &DownloadOptions::large_file(source.approx_bytes),
    )
    .await?;
    println!("Image downloaded to {}", dest.display());
    Ok(())
}

async fn download_busybox(config: &Config) -> Result<()> {
    let dest = initramfs::busybox_path(&config.downloads_dir);
    if dest.exists() {
        println!("busybox already downloaded: {}", dest.display());
        return Ok(());
    }

    println!("Downloading busybox...");
    download::http(initramfs::BUSYBOX_URL, &dest, &DownloadOptions::default()).await?;

    // The initramfs build re-chmods, but a usable local copy is nicer.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&dest)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&dest, perms)?;
    }
    println!("busybox downloaded to {}", dest.display());
    Ok(())
}

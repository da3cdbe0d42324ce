//! Show command - displays information.

use anyhow::Result;

use crate::config::Config;
use crate::initramfs::{self, INITRAMFS_FILENAME};
use crate::media::MediaManifest;
use crate::osimage;
use crate::partition::ReservePolicy;
use crate::{diskutil, media};

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show attached external disks
    Disks,
    /// Show build status (downloads, staged media)
    Status,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget, policy: &ReservePolicy) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
            println!();
            println!("Image catalog:");
            for image in osimage::catalog() {
                let marker = if image.filename == config.image_name {
                    " (selected)"
                } else {
                    ""
                };
                println!("  {}{}", image.filename, marker);
            }
        }
        ShowTarget::Disks => {
            let disks = diskutil::list_external_disks()?;
            if disks.is_empty() {
                println!("No external disks attached.");
            } else {
                println!("External disks:");
                for disk in &disks {
                    println!("  {}", disk.describe());
                }
            }
        }
        ShowTarget::Status => {
            println!("Downloads:");
            print_presence("image", config.image_path().exists());
            print_presence(
                "busybox",
                initramfs::busybox_path(&config.downloads_dir).exists(),
            );
            print_presence("firmware", config.firmware_dir().join("boot").exists());

            println!("\nOutputs:");
            let media_root = config.media_root();
            print_presence("media tree", media_root.exists());
            print_presence(
                "initramfs",
                media_root.join(INITRAMFS_FILENAME).exists(),
            );

            if media_root.join(media::MANIFEST_FILENAME).exists() {
                let manifest = MediaManifest::load(&media_root)?;
                println!("\nStaged media:");
                println!("  Volume:  {}", manifest.volume_label);
                println!("  OS:      {}", manifest.os);
                println!("  Image:   {}", manifest.image_name);
                println!("  Target:  {}", manifest.target_device);
                println!("  Files:   {}", manifest.files.len());
            }

            println!("\nSpare partition policy:");
            println!("  Reserve: {}% of the disk, at least {} MB", policy.percent, policy.floor_mb);
            println!("  Minimum spare size: {} MB", policy.min_spare_mb);
        }
    }
    Ok(())
}

fn print_presence(name: &str, present: bool) {
    let status = if present { "OK" } else { "MISSING" };
    println!("  {:10} [{}]", format!("{}:", name), status);
}

//! Spare command - carves a spare data partition on an attached disk.
//!
//! The setup scripts do this on the Pi during first boot; this command
//! is the host-side equivalent for a disk in a USB enclosure, with the
//! same reserve arithmetic. Needs Linux with `parted` and `mkfs.ext4`.

use anyhow::{bail, Context, Result};
use std::io::Write;

use crate::config::Config;
use crate::osimage::OsKind;
use crate::partition::{self, ReservePolicy};
use crate::process::{run, Cmd};

/// Execute the spare command.
pub fn cmd_spare(
    config: &Config,
    policy: &ReservePolicy,
    device: Option<&str>,
    label: Option<&str>,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let device = device.unwrap_or(&config.target_device);
    let label = match label {
        Some(l) => l.to_string(),
        None => OsKind::from_image_name(&config.image_name)
            .spare_label()
            .map(str::to_string)
            .context("No spare label for this image; pass --label")?,
    };

    // Already carved on a previous run: report instead of stacking
    // another partition behind it. A missing blkid just skips the probe.
    if let Ok(probe) = Cmd::new("blkid").args(["-L", &label]).allow_fail().run() {
        if probe.success() {
            println!(
                "Partition labeled '{}' already exists at {}; nothing to do.",
                label,
                probe.stdout_trimmed()
            );
            return Ok(());
        }
    }

    let result = Cmd::new("parted")
        .args(["-sm", device, "unit", "MB", "print"])
        .error_msg("parted failed to read the partition table")
        .run()?;
    let layout = partition::parse_parted_machine(&result.stdout)?;
    let last_end = layout.last_end_mb();

    let Some(region) = policy.plan_spare(layout.total_mb, last_end) else {
        println!(
            "No room for a spare partition on {} ({} MB total, {} MB used, {} MB reserved).",
            device,
            layout.total_mb,
            last_end,
            policy.reserve_mb(layout.total_mb)
        );
        return Ok(());
    };

    let index = layout.next_index();
    let part_dev = partition::partition_device(device, index);
    println!("Plan for {}:", device);
    println!("  Disk:      {} MB", layout.total_mb);
    println!("  Reserve:   {} MB (kept free for reflashes)", policy.reserve_mb(layout.total_mb));
    println!(
        "  Spare:     {} as ext4 '{}', {} MB ({}MB..{}MB)",
        part_dev,
        label,
        region.size_mb(),
        region.start_mb,
        region.end_mb
    );

    if dry_run {
        println!("\nDry run, nothing written.");
        return Ok(());
    }
    if !yes {
        confirm(device)?;
    }

    Cmd::new("parted")
        .args(["-s", device, "unit", "MB", "mkpart", "primary", "ext4"])
        .arg(format!("{}MB", region.start_mb))
        .arg(format!("{}MB", region.end_mb))
        .error_msg("parted mkpart failed")
        .run()?;

    // Let the kernel pick up the new table before formatting.
    let reread = Cmd::new("blockdev")
        .args(["--rereadpt", device])
        .allow_fail()
        .run()?;
    if !reread.success() {
        run("partprobe", [device])?;
    }
    std::thread::sleep(std::time::Duration::from_secs(2));

    Cmd::new("mkfs.ext4")
        .args(["-q", "-L", &label, &part_dev])
        .error_msg("mkfs.ext4 failed")
        .run()?;

    println!("Spare partition {} formatted as ext4 '{}'.", part_dev, label);
    Ok(())
}

fn confirm(device: &str) -> Result<()> {
    print!("Modify the partition table of {}? [y/N] ", device);
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        bail!("Aborted, nothing was written.");
    }
    Ok(())
}

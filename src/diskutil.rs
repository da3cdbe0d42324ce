//! macOS external disk handling via `diskutil`.
//!
//! The installer media is a removable disk on the build host. Detection
//! parses `diskutil list external physical`; details come from
//! `diskutil info`, which prints stable `Key: value` lines. Both parsers
//! are pure functions tested on canned output.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::process::{run, Cmd};

/// One external physical disk on the host.
#[derive(Debug, Clone)]
pub struct DiskInfo {
    /// Identifier like `disk4`.
    pub identifier: String,
    /// Device / media name, may be empty.
    pub name: String,
    pub size_bytes: u64,
    /// Connection protocol (USB, Thunderbolt), may be empty.
    pub protocol: String,
}

impl DiskInfo {
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.identifier)
    }

    /// Identifier of partition `index`, e.g. `disk4s1`.
    pub fn slice(&self, index: u32) -> String {
        format!("{}s{}", self.identifier, index)
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / 1_000_000_000.0
    }

    /// One-line description for pick lists and errors.
    pub fn describe(&self) -> String {
        let name = if self.name.is_empty() {
            "unnamed"
        } else {
            &self.name
        };
        format!(
            "{} ({:.1} GB, {}, {})",
            self.identifier,
            self.size_gb(),
            if self.protocol.is_empty() {
                "unknown bus"
            } else {
                &self.protocol
            },
            name
        )
    }
}

/// Extract external disk identifiers from `diskutil list external physical`.
///
/// Device header lines look like `/dev/disk4 (external, physical):`.
pub fn parse_disk_list(output: &str) -> Vec<String> {
    let mut disks = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("/dev/disk") {
            continue;
        }
        if !line.contains("external") || !line.contains("physical") {
            continue;
        }
        if let Some(dev) = line.split_whitespace().next() {
            if let Some(id) = dev.strip_prefix("/dev/") {
                disks.push(id.to_string());
            }
        }
    }
    disks
}

/// Parse `diskutil info` output into a key/value map.
pub fn parse_info(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// Pull the byte count out of a size value like
/// `62.7 GB (62742792192 Bytes) (exactly 122544516 512-Byte-Units)`.
pub fn parse_size_bytes(value: &str) -> Option<u64> {
    let open = value.find('(')?;
    let rest = &value[open + 1..];
    let close = rest.find(')')?;
    let inner = &rest[..close];
    let number = inner.split_whitespace().next()?;
    number.parse().ok()
}

/// List all external physical disks with their details.
pub fn list_external_disks() -> Result<Vec<DiskInfo>> {
    let result = run("diskutil", ["list", "external", "physical"])?;
    let mut disks = Vec::new();
    for identifier in parse_disk_list(&result.stdout) {
        disks.push(disk_info(&identifier)?);
    }
    Ok(disks)
}

/// Fetch details for one disk or partition identifier.
pub fn disk_info(identifier: &str) -> Result<DiskInfo> {
    let result = run("diskutil", ["info", identifier])?;
    let info = parse_info(&result.stdout);

    let size_bytes = info
        .get("Disk Size")
        .or_else(|| info.get("Total Size"))
        .and_then(|v| parse_size_bytes(v))
        .unwrap_or(0);

    Ok(DiskInfo {
        identifier: identifier.to_string(),
        name: info
            .get("Device / Media Name")
            .cloned()
            .unwrap_or_default(),
        size_bytes,
        protocol: info.get("Protocol").cloned().unwrap_or_default(),
    })
}

/// Pick the disk to write. Zero external disks is an error; more than one
/// requires an explicit choice so we never format the wrong drive.
pub fn select_disk(disks: &[DiskInfo], requested: Option<&str>) -> Result<DiskInfo> {
    if let Some(wanted) = requested {
        let wanted = wanted.strip_prefix("/dev/").unwrap_or(wanted);
        return disks
            .iter()
            .find(|d| d.identifier == wanted)
            .cloned()
            .with_context(|| format!("Disk '{}' is not an external physical disk", wanted));
    }

    match disks.len() {
        0 => bail!("No external disk found. Plug in the installer drive."),
        1 => Ok(disks[0].clone()),
        _ => {
            let listing: Vec<String> = disks.iter().map(|d| format!("  {}", d.describe())).collect();
            bail!(
                "Multiple external disks found; pass --disk <id> to choose:\n{}",
                listing.join("\n")
            );
        }
    }
}

/// Erase the whole disk as a single FAT32 volume with the given label.
/// MBR keeps the Pi 5 bootloader happy.
pub fn erase_fat32(disk: &DiskInfo, label: &str) -> Result<()> {
    println!(
        "Erasing {} as FAT32 volume '{}'...",
        disk.device_path(),
        label
    );
    Cmd::new("diskutil")
        .args(["eraseDisk", "FAT32", label, "MBRFormat"])
        .arg(disk.device_path())
        .error_msg("diskutil eraseDisk failed")
        .run()?;
    Ok(())
}

/// Mount point of the first partition, if mounted.
pub fn mount_point(disk: &DiskInfo) -> Result<Option<PathBuf>> {
    let result = run("diskutil", ["info", &disk.slice(1)])?;
    let info = parse_info(&result.stdout);
    Ok(info
        .get("Mount Point")
        .filter(|v| *v != "Not applicable (no file system)")
        .map(PathBuf::from))
}

/// Mount point of the first partition, remounting if necessary.
///
/// macOS occasionally unmounts freshly erased volumes mid-run; re-detect
/// and remount instead of failing the install.
pub fn ensure_mounted(disk: &DiskInfo) -> Result<PathBuf> {
    if let Some(mp) = mount_point(disk)? {
        return Ok(mp);
    }
    println!("Volume not mounted, remounting {}...", disk.slice(1));
    Cmd::new("diskutil")
        .args(["mount", &disk.slice(1)])
        .error_msg("diskutil mount failed")
        .run()?;
    mount_point(disk)?.context("Volume did not appear after remount")
}

/// Unmount all volumes of the disk (before eject or raw writes).
pub fn unmount_disk(disk: &DiskInfo) -> Result<()> {
    Cmd::new("diskutil")
        .args(["unmountDisk", &disk.device_path()])
        .error_msg("diskutil unmountDisk failed")
        .run()?;
    Ok(())
}

/// Eject the disk once the media is assembled.
pub fn eject(disk: &DiskInfo) -> Result<()> {
    Cmd::new("diskutil")
        .args(["eject", &disk.device_path()])
        .error_msg("diskutil eject failed")
        .run()?;
    Ok(())
}

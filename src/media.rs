//! Installer media assembly.
//!
//! The "protocol" between host and Pi is nothing but file presence and
//! naming on a FAT32 volume: the image, the initramfs, secrets, setup
//! scripts, and boot firmware, all recorded in a manifest for `show
//! status` and `validate`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::files::{copy_file_with_dirs, write_file_mode, write_file_with_dirs};
use crate::config::Config;
use crate::firmware;
use crate::osimage::OsKind;
use crate::partition::ReservePolicy;
use crate::scripts::{self, shell_quote};

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// What was staged onto the media, written alongside the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaManifest {
    pub volume_label: String,
    pub image_name: String,
    pub os: String,
    pub target_device: String,
    /// Filled in when the image itself is copied (install), absent after
    /// a plain `generate`.
    pub image_sha256: Option<String>,
    /// Relative paths of all staged files, sorted.
    pub files: Vec<String>,
}

impl MediaManifest {
    pub fn save(&self, media_root: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_file_with_dirs(media_root.join(MANIFEST_FILENAME), json)?;
        Ok(())
    }

    pub fn load(media_root: &Path) -> Result<Self> {
        let path = media_root.join(MANIFEST_FILENAME);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("No manifest at {}", path.display()))?;
        let manifest =
            serde_json::from_str(&json).with_context(|| format!("Corrupt {}", path.display()))?;
        Ok(manifest)
    }
}

/// Write the generated, non-downloaded artifacts into `media_root`:
/// setup scripts, boot config, WiFi credentials, and secrets.
pub fn stage_generated(media_root: &Path, config: &Config, policy: &ReservePolicy) -> Result<()> {
    for script in scripts::setup::render_all(policy) {
        write_file_mode(
            media_root.join("os-setups").join(&script.filename),
            &script.content,
            0o755,
        )?;
    }

    write_file_with_dirs(media_root.join("config.txt"), firmware::render_config_txt())?;
    write_file_with_dirs(
        media_root.join("cmdline.txt"),
        firmware::render_cmdline_txt(),
    )?;

    if config.has_wifi() {
        // Sourced by the boot init script; the keys must match the
        // variables it initializes and hands to the setup scripts.
        let conf = format!(
            "wifi_ssid={}\nwifi_password={}\n",
            shell_quote(config.wifi_ssid.as_deref().unwrap_or_default()),
            shell_quote(config.wifi_password.as_deref().unwrap_or_default()),
        );
        write_file_mode(media_root.join("wifi.conf"), conf, 0o600)?;
    }

    if let Some(key_file) = &config.tailscale_key_file {
        let key = fs::read_to_string(key_file)
            .with_context(|| format!("Failed to read Tailscale key {}", key_file.display()))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Tailscale key file {} is empty", key_file.display());
        }
        write_file_mode(media_root.join("tailscale.key"), format!("{}\n", key), 0o600)?;
    }

    if let Some(pubkey_file) = &config.ssh_pubkey_file {
        let pubkey = fs::read_to_string(pubkey_file)
            .with_context(|| format!("Failed to read SSH public key {}", pubkey_file.display()))?;
        write_file_with_dirs(media_root.join("authorized_keys"), pubkey)?;
    }

    Ok(())
}

/// Build the manifest from what is actually on disk under `media_root`.
pub fn collect_manifest(
    media_root: &Path,
    config: &Config,
    image_sha256: Option<String>,
) -> Result<MediaManifest> {
    let mut files = Vec::new();
    for entry in WalkDir::new(media_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(media_root)
            .context("walked path outside media root")?;
        let rel = rel.to_string_lossy().into_owned();
        if rel == MANIFEST_FILENAME {
            continue;
        }
        files.push(rel);
    }
    files.sort();

    Ok(MediaManifest {
        volume_label: config.volume_label.clone(),
        image_name: config.image_name.clone(),
        os: OsKind::from_image_name(&config.image_name).name().to_string(),
        target_device: config.target_device.clone(),
        image_sha256,
        files,
    })
}

/// Copy the staged media tree onto the mounted volume.
pub fn copy_tree(media_root: &Path, volume_root: &Path) -> Result<()> {
    for entry in WalkDir::new(media_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(media_root)
            .context("walked path outside media root")?;
        copy_file_with_dirs(entry.path(), &volume_root.join(rel))
            .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
    }
    Ok(())
}

/// Copy the OS image onto the volume, with a size-based progress note.
/// FAT32 has a 4 GiB file limit; compressed images stay well under it,
/// but a decompressed `.img` would not, so refuse anything bigger.
pub fn copy_image(image_path: &Path, volume_root: &Path) -> Result<PathBuf> {
    let size = fs::metadata(image_path)
        .with_context(|| format!("Image not found at {}", image_path.display()))?
        .len();
    if size >= 4 * 1024 * 1024 * 1024 {
        bail!(
            "Image {} is {} bytes, too large for FAT32. Use the compressed .img.xz.",
            image_path.display(),
            size
        );
    }

    let filename = image_path
        .file_name()
        .context("image path has no filename")?;
    let dest = volume_root.join(filename);
    println!(
        "Copying image ({:.1} MB)... this can take a while on USB media",
        size as f64 / (1024.0 * 1024.0)
    );
    fs::copy(image_path, &dest)
        .with_context(|| format!("Failed to copy image to {}", dest.display()))?;
    Ok(dest)
}

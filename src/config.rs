//! Configuration management for pimedia.
//!
//! Reads configuration from .env file and environment variables.
//! Environment variables take precedence over .env file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::osimage::{self, ImageSource};

/// Default git URL for the Raspberry Pi boot firmware.
pub const DEFAULT_FIRMWARE_GIT_URL: &str = "https://github.com/raspberrypi/firmware.git";

/// Default flashing target on the Pi.
pub const DEFAULT_TARGET_DEVICE: &str = "/dev/nvme0n1";

/// FAT32 volume label of the installer media. The boot init script finds
/// the media by this label, so it has to match what `install` formats.
pub const DEFAULT_VOLUME_LABEL: &str = "PIMEDIA";

/// Pimedia configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Image filename to install (default: HAOS from the catalog).
    pub image_name: String,
    /// Download URL override for the image.
    pub image_url: Option<String>,
    /// WiFi network the installed OS should join.
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    /// Path to a file holding a Tailscale pre-auth key.
    pub tailscale_key_file: Option<PathBuf>,
    /// Path to an SSH public key to install on the target OS.
    pub ssh_pubkey_file: Option<PathBuf>,
    /// Git URL for the Raspberry Pi boot firmware.
    pub firmware_git_url: String,
    /// Device the init script flashes (default: /dev/nvme0n1).
    pub target_device: String,
    /// FAT32 label for the installer media.
    pub volume_label: String,
    /// Where downloaded images and firmware live.
    pub downloads_dir: PathBuf,
    /// Project directory the configuration was loaded from.
    pub base_dir: PathBuf,
}

impl Config {
    /// Load configuration from .env file and environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        // Try to load .env file
        let env_path = base_dir.join(".env");
        if env_path.exists() {
            if let Ok(content) = fs::read_to_string(&env_path) {
                for line in content.lines() {
                    let line = line.trim();
                    // Skip comments and empty lines
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    // Parse KEY=value
                    if let Some((key, value)) = line.split_once('=') {
                        let key = key.trim();
                        let value = value.trim();
                        // Remove quotes if present
                        let value = value.trim_matches('"').trim_matches('\'');
                        env_vars.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        let image_name = env_vars
            .get("PIMEDIA_IMAGE")
            .cloned()
            .unwrap_or_else(|| osimage::catalog()[0].filename.clone());

        let path_from = |key: &str| -> Option<PathBuf> {
            env_vars.get(key).map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            })
        };

        // Images are large; keep them in the user cache like other tools
        // unless overridden.
        let downloads_dir = path_from("PIMEDIA_DOWNLOADS").unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("pimedia"))
                .unwrap_or_else(|| base_dir.join("downloads"))
        });

        Self {
            image_name,
            image_url: env_vars.get("PIMEDIA_IMAGE_URL").cloned(),
            wifi_ssid: env_vars.get("WIFI_SSID").cloned(),
            wifi_password: env_vars.get("WIFI_PASSWORD").cloned(),
            tailscale_key_file: path_from("TAILSCALE_KEY_FILE"),
            ssh_pubkey_file: path_from("SSH_PUBKEY_FILE"),
            firmware_git_url: env_vars
                .get("FIRMWARE_GIT_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_FIRMWARE_GIT_URL.to_string()),
            target_device: env_vars
                .get("TARGET_DEVICE")
                .cloned()
                .unwrap_or_else(|| DEFAULT_TARGET_DEVICE.to_string()),
            volume_label: env_vars
                .get("PIMEDIA_VOLUME_LABEL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_VOLUME_LABEL.to_string()),
            downloads_dir,
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Build outputs (staged media tree, initramfs) live under the
    /// project directory, not the download cache.
    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join("output")
    }

    /// The staged media tree, assembled by `generate`.
    pub fn media_root(&self) -> PathBuf {
        self.output_dir().join("media-root")
    }

    /// Optional directory of static aarch64 tools (parted, mkfs.ext4)
    /// to bundle into the initramfs.
    pub fn tools_dir(&self) -> Option<PathBuf> {
        let dir = self.base_dir.join("tools");
        dir.exists().then_some(dir)
    }

    /// Resolve the image to install: catalog entry, URL override, or both.
    pub fn image_source(&self) -> ImageSource {
        let catalog_entry = osimage::find_in_catalog(&self.image_name);
        let url = self
            .image_url
            .clone()
            .or_else(|| catalog_entry.as_ref().map(|i| i.url.clone()))
            .unwrap_or_default();
        let approx_bytes = catalog_entry
            .as_ref()
            .map(|i| i.approx_bytes)
            .unwrap_or(512 * 1024 * 1024);
        ImageSource {
            filename: self.image_name.clone(),
            url,
            approx_bytes,
        }
    }

    pub fn image_path(&self) -> PathBuf {
        self.downloads_dir.join(&self.image_name)
    }

    pub fn firmware_dir(&self) -> PathBuf {
        self.downloads_dir.join("firmware")
    }

    pub fn has_wifi(&self) -> bool {
        self.wifi_ssid.is_some() && self.wifi_password.is_some()
    }

    /// Print configuration for `show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  PIMEDIA_IMAGE: {}", self.image_name);
        match &self.image_url {
            Some(url) => println!("  PIMEDIA_IMAGE_URL: {}", url),
            None => println!("  PIMEDIA_IMAGE_URL: (from catalog)"),
        }
        println!(
            "  WIFI_SSID: {}",
            self.wifi_ssid.as_deref().unwrap_or("(not set)")
        );
        println!(
            "  WIFI_PASSWORD: {}",
            if self.wifi_password.is_some() {
                "(set)"
            } else {
                "(not set)"
            }
        );
        match &self.tailscale_key_file {
            Some(p) => println!("  TAILSCALE_KEY_FILE: {}", p.display()),
            None => println!("  TAILSCALE_KEY_FILE: (not set)"),
        }
        match &self.ssh_pubkey_file {
            Some(p) => println!("  SSH_PUBKEY_FILE: {}", p.display()),
            None => println!("  SSH_PUBKEY_FILE: (not set)"),
        }
        println!("  FIRMWARE_GIT_URL: {}", self.firmware_git_url);
        println!("  TARGET_DEVICE: {}", self.target_device);
        println!("  PIMEDIA_VOLUME_LABEL: {}", self.volume_label);
        println!("  Downloads: {}", self.downloads_dir.display());
        if self.image_path().exists() {
            println!("  Image: FOUND");
        } else {
            println!("  Image: NOT FOUND (run 'pimedia download image' to fetch)");
        }
    }
}

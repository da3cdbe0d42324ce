//! OS image catalog and per-OS installation conventions.
//!
//! The boot-time installer decides everything from the image filename on
//! the media, so the mapping here has to match what the generated scripts
//! compute from the same name.

use std::path::{Path, PathBuf};

/// Operating systems the installer knows how to set up after flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsKind {
    Haos,
    Ubuntu,
    /// Anything else gets flashed but receives a no-op setup.
    Unknown,
}

impl OsKind {
    /// Map an image filename to its OS kind.
    ///
    /// `haos_rpi5-64-16.0.img.xz` -> Haos,
    /// `ubuntu-24.04-preinstalled-server-arm64+raspi.img.xz` -> Ubuntu.
    pub fn from_image_name(name: &str) -> Self {
        if name.starts_with("haos_") {
            OsKind::Haos
        } else if name.starts_with("ubuntu-") {
            OsKind::Ubuntu
        } else {
            OsKind::Unknown
        }
    }

    /// Short name, used for `os-setups/setup_<os>.sh` on the media.
    pub fn name(&self) -> &'static str {
        match self {
            OsKind::Haos => "haos",
            OsKind::Ubuntu => "ubuntu",
            OsKind::Unknown => "unknown",
        }
    }

    pub fn all() -> [OsKind; 3] {
        [OsKind::Haos, OsKind::Ubuntu, OsKind::Unknown]
    }

    /// Conventional root (or data) partition index in the published image
    /// layout. HAOS ships an 8-partition layout with the data partition
    /// last; Ubuntu preinstalled images put the rootfs second.
    pub fn root_partition_index(&self) -> Option<u32> {
        match self {
            OsKind::Haos => Some(8),
            OsKind::Ubuntu => Some(2),
            OsKind::Unknown => None,
        }
    }

    /// Label for the spare data partition carved after the image.
    /// Re-used on reflash to detect that the partition already exists.
    pub fn spare_label(&self) -> Option<&'static str> {
        match self {
            OsKind::Haos => Some("HAOS_DATA"),
            OsKind::Ubuntu => Some("UBUNTU_HOME"),
            OsKind::Unknown => None,
        }
    }
}

/// A downloadable OS image.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub filename: String,
    pub url: String,
    /// Rough compressed size, used for the disk-space preflight.
    pub approx_bytes: u64,
}

impl ImageSource {
    pub fn kind(&self) -> OsKind {
        OsKind::from_image_name(&self.filename)
    }

    pub fn path_in(&self, downloads_dir: &Path) -> PathBuf {
        downloads_dir.join(&self.filename)
    }
}

/// Built-in image catalog. The config can override both URL and filename
/// for images that are not listed here.
pub fn catalog() -> Vec<ImageSource> {
    vec![
        ImageSource {
            filename: "haos_rpi5-64-16.0.img.xz".to_string(),
            url: "https://github.com/home-assistant/operating-system/releases/download/16.0/haos_rpi5-64-16.0.img.xz"
                .to_string(),
            approx_bytes: 400 * 1024 * 1024,
        },
        ImageSource {
            filename: "ubuntu-24.04-preinstalled-server-arm64+raspi.img.xz".to_string(),
            url: "https://cdimage.ubuntu.com/releases/24.04/release/ubuntu-24.04-preinstalled-server-arm64+raspi.img.xz"
                .to_string(),
            approx_bytes: 1200 * 1024 * 1024,
        },
    ]
}

/// Look up a catalog entry by filename.
pub fn find_in_catalog(filename: &str) -> Option<ImageSource> {
    catalog().into_iter().find(|i| i.filename == filename)
}

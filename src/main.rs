//! Pimedia - Raspberry Pi 5 installer media builder.
//!
//! Builds a FAT32 USB drive that flashes an OS image onto the Pi's NVMe
//! on first boot and provisions it (Tailscale, WiFi, SSH keys):
//! - Minimal busybox initramfs with a generated /init flasher
//! - Per-OS setup scripts (Home Assistant OS, Ubuntu Server)
//! - Raspberry Pi boot firmware from a shallow clone
#![allow(dead_code)]

mod clean;
mod commands;
mod common;
mod config;
mod diskutil;
mod download;
mod firmware;
mod initramfs;
mod media;
mod osimage;
mod partition;
mod preflight;
mod process;
mod scripts;
mod validate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::Config;
use partition::ReservePolicy;

#[derive(Parser)]
#[command(name = "pimedia")]
#[command(about = "Raspberry Pi 5 installer media builder")]
#[command(
    after_help = "QUICK START:\n  pimedia preflight  Check host tools and configuration\n  pimedia download   Fetch image, busybox, and firmware\n  pimedia generate   Stage the media tree\n  pimedia install    Write it onto the installer drive"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run preflight checks (host tools and configuration)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Download build inputs (default: everything)
    Download {
        #[command(subcommand)]
        what: Option<DownloadTarget>,
    },

    /// Stage the media tree and pack the initramfs
    Generate,

    /// Erase an external disk and write the staged media onto it
    Install {
        /// Disk identifier to write (required with multiple disks attached)
        #[arg(long)]
        disk: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate an assembled media tree
    Validate {
        /// Media tree to validate (default: output/media-root)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Run checks concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Carve a spare data partition on an attached disk (Linux host)
    Spare {
        /// Block device (default: the configured target device)
        #[arg(long)]
        device: Option<String>,
        /// Filesystem label (default: derived from the selected image)
        #[arg(long)]
        label: Option<String>,
        /// Print the plan without modifying anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Clean build artifacts (default: preserves downloads)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Subcommand)]
enum DownloadTarget {
    /// Download the OS image
    Image,
    /// Download the static busybox for the initramfs
    Busybox,
    /// Clone the Raspberry Pi boot firmware
    Firmware,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Clean downloaded files (image, busybox, firmware clone)
    Downloads,
    /// Clean everything (downloads + outputs)
    All,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration and the image catalog
    Config,
    /// Show attached external disks
    Disks,
    /// Show build status (downloads, staged media)
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir().context("Cannot determine working directory")?;

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load(&base_dir);
    let policy = ReservePolicy::default();

    match cli.command {
        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Download { what } => {
            let download_target = match what {
                None => commands::download::DownloadTarget::All,
                Some(DownloadTarget::Image) => commands::download::DownloadTarget::Image,
                Some(DownloadTarget::Busybox) => commands::download::DownloadTarget::Busybox,
                Some(DownloadTarget::Firmware) => commands::download::DownloadTarget::Firmware,
            };
            commands::cmd_download(&config, download_target)?;
        }

        Commands::Generate => {
            commands::cmd_generate(&config, &policy)?;
        }

        Commands::Install { disk, yes } => {
            commands::cmd_install(&config, disk.as_deref(), yes)?;
        }

        Commands::Validate { path, parallel } => {
            commands::cmd_validate(&config, path.as_deref(), parallel)?;
        }

        Commands::Spare {
            device,
            label,
            dry_run,
            yes,
        } => {
            commands::cmd_spare(
                &config,
                &policy,
                device.as_deref(),
                label.as_deref(),
                dry_run,
                yes,
            )?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::Downloads) => commands::clean::CleanTarget::Downloads,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Disks => commands::show::ShowTarget::Disks,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(&config, show_target, &policy)?;
        }
    }

    Ok(())
}

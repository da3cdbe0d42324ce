//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `generate` - Stage the media tree and pack the initramfs
//! - `install` - Write the staged tree onto an external disk
//! - `download` - Fetch the OS image, busybox, and boot firmware
//! - `spare` - Carve a spare data partition on an attached disk
//! - `validate` - Check an assembled media tree
//! - `preflight` - Run host readiness checks
//! - `clean` - Clean build artifacts
//! - `show` - Display information

pub mod clean;
pub mod download;
mod generate;
mod install;
mod preflight;
pub mod show;
mod spare;
mod validate;

pub use clean::cmd_clean;
pub use download::cmd_download;
pub use generate::cmd_generate;
pub use install::cmd_install;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use spare::cmd_spare;
pub use validate::cmd_validate;

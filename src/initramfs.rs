//! Minimal flashing initramfs.
//!
//! A static busybox plus the generated `/init` is all the installer needs
//! to flash an image. Partition carving additionally wants `parted` and
//! `mkfs.ext4`; those are staged from an optional tools directory and the
//! generated scripts degrade to a warning when they are absent.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::process::{shell, shell_in};

/// Static busybox for the Pi 5 (aarch64 runs armv8l binaries natively).
pub const BUSYBOX_URL: &str =
    "https://busybox.net/downloads/binaries/1.31.0-defconfig-multiarch-musl/busybox-armv8l";

/// Name of the packed initramfs on the media.
pub const INITRAMFS_FILENAME: &str = "initramfs.img";

/// Busybox applets the init and setup scripts call by name.
pub fn applet_links() -> &'static [&'static str] {
    &[
        "sh", "mount", "umount", "mountpoint", "sleep", "echo", "printf", "cat", "find", "head",
        "basename", "dirname", "awk", "grep", "mkdir", "chmod", "chown", "ln", "ls", "cp",
        "rm", "sync", "dd", "xz", "blockdev", "blkid", "findfs", "poweroff",
    ]
}

pub fn busybox_path(downloads_dir: &Path) -> PathBuf {
    downloads_dir.join("busybox")
}

/// Assemble and pack the initramfs.
///
/// Returns the path of the packed image under `output_dir`.
pub fn build_initramfs(
    output_dir: &Path,
    busybox: &Path,
    init_script: &str,
    tools_dir: Option<&Path>,
) -> Result<PathBuf> {
    if !busybox.exists() {
        bail!(
            "busybox not found at {}. Run 'pimedia download' first.",
            busybox.display()
        );
    }

    let staging = output_dir.join("initramfs-root");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    for dir in ["bin", "proc", "sys", "dev", "media", "mnt", "etc"] {
        fs::create_dir_all(staging.join(dir))?;
    }

    let busybox_dest = staging.join("bin/busybox");
    fs::copy(busybox, &busybox_dest)
        .with_context(|| format!("Failed to copy {}", busybox.display()))?;
    let mut perms = fs::metadata(&busybox_dest)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&busybox_dest, perms)?;

    for applet in applet_links() {
        symlink("busybox", staging.join("bin").join(applet))
            .with_context(|| format!("Failed to link applet '{}'", applet))?;
    }

    if let Some(tools) = tools_dir {
        stage_extra_tools(&staging, tools)?;
    } else {
        println!("No extra tools directory; spare-partition carving will be skipped on target.");
    }

    crate::common::files::write_file_mode(staging.join("init"), init_script, 0o755)?;

    pack(&staging, output_dir)
}

/// Copy static extra tools (parted, mkfs.ext4) into the initramfs bin.
fn stage_extra_tools(staging: &Path, tools_dir: &Path) -> Result<()> {
    if !tools_dir.exists() {
        println!(
            "Tools directory {} not found; spare-partition carving will be skipped on target.",
            tools_dir.display()
        );
        return Ok(());
    }
    let mut count = 0;
    for entry in fs::read_dir(tools_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let dest = staging.join("bin").join(entry.file_name());
        fs::copy(entry.path(), &dest)?;
        let mut perms = fs::metadata(&dest)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&dest, perms)?;
        count += 1;
    }
    println!("Staged {} extra tool(s) from {}", count, tools_dir.display());
    Ok(())
}

/// Pack the staging directory as a newc cpio compressed with xz.
///
/// The kernel only accepts crc32 checksums in xz initramfs images. The
/// pipeline cannot use pipefail (not POSIX), so a failed `cpio` (or one
/// missing entirely) still yields a valid xz stream of nothing. The image
/// is listed back afterwards and must contain the entries that matter.
fn pack(staging: &Path, output_dir: &Path) -> Result<PathBuf> {
    let image_path = output_dir.join(INITRAMFS_FILENAME);
    if image_path.exists() {
        fs::remove_file(&image_path)?;
    }

    let command = format!(
        "find . | cpio -o -H newc --quiet | xz -9 --check=crc32 > {}",
        shell_word(&image_path)
    );
    shell_in(&command, staging).context("initramfs packing pipeline failed")?;
    verify_packed(&image_path)?;

    let size = fs::metadata(&image_path)
        .with_context(|| format!("initramfs not created at {}", image_path.display()))?
        .len();

    println!(
        "Initramfs packed: {} ({:.1} MB)",
        image_path.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(image_path)
}

/// List the packed image and require the entries a bootable installer
/// initramfs cannot do without.
fn verify_packed(image_path: &Path) -> Result<()> {
    let command = format!("xz -dc {} | cpio -t", shell_word(image_path));
    let listing = shell(&command)
        .with_context(|| format!("packed initramfs at {} does not list", image_path.display()))?;
    for required in ["./init", "./bin/busybox"] {
        if !listing.stdout.lines().any(|l| l.trim_end() == required) {
            bail!(
                "packed initramfs at {} is missing {}",
                image_path.display(),
                required
            );
        }
    }
    Ok(())
}

fn shell_word(path: &Path) -> String {
    crate::scripts::shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fake_busybox(dir: &Path) -> PathBuf {
        let path = dir.join("busybox");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        path
    }

    #[test]
    fn test_applet_links_cover_init_needs() {
        let applets = applet_links();
        for needed in ["sh", "findfs", "dd", "xz", "blockdev", "poweroff"] {
            assert!(applets.contains(&needed), "missing applet {}", needed);
        }
    }

    #[test]
    fn test_build_requires_busybox() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_initramfs(
            dir.path(),
            &dir.path().join("missing-busybox"),
            "#!/bin/sh\n",
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("busybox not found"));
    }

    #[test]
    fn test_build_creates_packed_image() {
        let dir = tempfile::tempdir().unwrap();
        let busybox = fake_busybox(dir.path());
        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();

        let image = build_initramfs(&output, &busybox, "#!/bin/sh\necho hi\n", None).unwrap();

        assert!(image.exists());
        assert!(fs::metadata(&image).unwrap().len() > 0);

        // Staging tree sanity
        let staging = output.join("initramfs-root");
        assert!(staging.join("bin/busybox").exists());
        assert!(staging.join("bin/sh").exists());
        let init = staging.join("init");
        let mode = fs::metadata(&init).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_extra_tools_are_staged_executable() {
        let dir = tempfile::tempdir().unwrap();
        let busybox = fake_busybox(dir.path());
        let tools = dir.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        fs::write(tools.join("parted"), b"ELF").unwrap();

        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();
        build_initramfs(&output, &busybox, "#!/bin/sh\n", Some(&tools)).unwrap();

        let staged = output.join("initramfs-root/bin/parted");
        assert!(staged.exists());
        let mode = fs::metadata(&staged).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_packed_image_lists_init_and_busybox() {
        let dir = tempfile::tempdir().unwrap();
        let busybox = fake_busybox(dir.path());
        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();

        let image = build_initramfs(&output, &busybox, "#!/bin/sh\n", None).unwrap();

        let listing = shell(&format!("xz -dc {} | cpio -t", shell_word(&image))).unwrap();
        let entries: Vec<&str> = listing.stdout.lines().collect();
        assert!(entries.contains(&"./init"));
        assert!(entries.contains(&"./bin/busybox"));
    }

    #[test]
    fn test_verify_rejects_archive_of_nothing() {
        // What the pipeline produces when cpio fails or is absent: a valid,
        // non-empty xz stream compressing zero bytes.
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join(INITRAMFS_FILENAME);
        shell(&format!(
            "printf '' | xz -9 --check=crc32 > {}",
            shell_word(&image)
        ))
        .unwrap();
        assert!(fs::metadata(&image).unwrap().len() > 0);

        let err = verify_packed(&image).unwrap_err();
        assert!(err.to_string().contains(&image.display().to_string()));
    }

    #[test]
    fn test_verify_rejects_archive_without_init() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("other-file"), "x").unwrap();
        let image = dir.path().join(INITRAMFS_FILENAME);
        shell_in(
            &format!(
                "echo ./other-file | cpio -o -H newc --quiet | xz -9 --check=crc32 > {}",
                shell_word(&image)
            ),
            dir.path(),
        )
        .unwrap();

        let err = verify_packed(&image).unwrap_err();
        assert!(err.to_string().contains("missing ./init"));
    }

    #[test]
    fn test_rebuild_replaces_previous_staging() {
        let dir = tempfile::tempdir().unwrap();
        let busybox = fake_busybox(dir.path());
        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();

        build_initramfs(&output, &busybox, "#!/bin/sh\n# one\n", None).unwrap();
        let stale = output.join("initramfs-root/stale-file");
        fs::write(&stale, "x").unwrap();
        build_initramfs(&output, &busybox, "#!/bin/sh\n# two\n", None).unwrap();

        assert!(!stale.exists());
        let init = fs::read_to_string(output.join("initramfs-root/init")).unwrap();
        assert!(init.contains("# two"));
    }
}

//! Validation of assembled installer media.
//!
//! Runs against a staged output directory or the mounted volume and
//! checks that everything the boot path touches is present and sane:
//! boot firmware, a syntactically valid init and setup scripts, a
//! listable initramfs, the image, secret permissions, and the manifest.

use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::firmware::BOOT_FILES;
use crate::initramfs::INITRAMFS_FILENAME;
use crate::media::MediaManifest;
use crate::preflight::{CheckReport, CheckResult};
use crate::process::{shell, Cmd};

type Check = Box<dyn FnOnce() -> CheckResult + Send>;

/// Validate the media tree at `media_root`.
///
/// With `parallel`, checks fan out over blocking tasks; the external
/// tool invocations (`sh -n`, `xz -t`, `cpio -t`) dominate the runtime
/// and are independent of each other.
pub fn validate_media(media_root: &Path, parallel: bool) -> Result<CheckReport> {
    let checks = build_checks(media_root);

    let results = if parallel {
        run_parallel(checks)?
    } else {
        checks.into_iter().map(|(_, check)| check()).collect()
    };

    Ok(CheckReport { checks: results })
}

fn build_checks(media_root: &Path) -> Vec<(String, Check)> {
    let mut checks: Vec<(String, Check)> = Vec::new();
    let root = media_root.to_path_buf();

    {
        let root = root.clone();
        checks.push((
            "firmware".to_string(),
            Box::new(move || check_firmware(&root)),
        ));
    }
    {
        let root = root.clone();
        checks.push((
            "initramfs".to_string(),
            Box::new(move || check_initramfs(&root)),
        ));
    }
    {
        let root = root.clone();
        checks.push(("image".to_string(), Box::new(move || check_image(&root))));
    }
    {
        let root = root.clone();
        checks.push((
            "secrets".to_string(),
            Box::new(move || check_secret_modes(&root)),
        ));
    }
    {
        let root = root.clone();
        checks.push((
            "manifest".to_string(),
            Box::new(move || check_manifest(&root)),
        ));
    }
    for script in script_paths(&root) {
        let name = format!(
            "script {}",
            script
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        checks.push((name, Box::new(move || check_script(&script))));
    }

    checks
}

fn run_parallel(checks: Vec<(String, Check)>) -> Result<Vec<CheckResult>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let mut handles = Vec::new();
        for (name, check) in checks {
            handles.push((name, tokio::task::spawn_blocking(check)));
        }

        let mut results = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(_) => results.push(CheckResult::fail(&name, "check panicked")),
            }
        }
        Ok(results)
    })
}

/// Boot firmware set: kernel, device tree, and the generated boot config.
fn check_firmware(media_root: &Path) -> CheckResult {
    let mut missing = Vec::new();
    let mut expected: Vec<&str> = vec!["config.txt", "cmdline.txt"];
    expected.extend(BOOT_FILES);

    for file in expected {
        if !media_root.join(file).exists() {
            missing.push(file);
        }
    }
    if missing.is_empty() {
        CheckResult::pass("firmware")
    } else {
        CheckResult::fail("firmware", &format!("missing: {}", missing.join(", ")))
    }
}

/// The initramfs must exist and list cleanly as an xz'd newc cpio.
fn check_initramfs(media_root: &Path) -> CheckResult {
    let image = media_root.join(INITRAMFS_FILENAME);
    if !image.exists() {
        return CheckResult::fail(INITRAMFS_FILENAME, "not found");
    }

    let command = format!(
        "xz -dc {} | cpio -t",
        crate::scripts::shell_quote(&image.to_string_lossy())
    );
    match shell(&command) {
        Ok(result) => {
            // Entries are relative to the staging root, so /init lists
            // as `./init` (or `init` depending on the cpio).
            if result
                .stdout
                .lines()
                .any(|l| l.trim_end() == "./init" || l.trim_end() == "init")
            {
                CheckResult::pass(INITRAMFS_FILENAME)
            } else {
                CheckResult::fail(INITRAMFS_FILENAME, "archive has no /init")
            }
        }
        Err(e) => CheckResult::fail(INITRAMFS_FILENAME, &format!("unreadable: {}", e)),
    }
}

/// The OS image, when present, must pass `xz -t`. Absence is a warning:
/// a staged tree before `install` has no image yet.
fn check_image(media_root: &Path) -> CheckResult {
    let images: Vec<PathBuf> = std::fs::read_dir(media_root)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.to_string_lossy().ends_with(".img.xz"))
                .collect()
        })
        .unwrap_or_default();

    let Some(image) = images.first() else {
        return CheckResult::warn("image", "no .img.xz on media (staged before install?)");
    };

    let result = Cmd::new("xz")
        .arg("-t")
        .arg_path(image)
        .allow_fail()
        .run();
    match result {
        Ok(r) if r.success() => CheckResult::pass_with(
            "image",
            &image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        Ok(r) => CheckResult::fail(
            "image",
            &format!("xz -t failed: {}", r.stderr_trimmed()),
        ),
        Err(e) => CheckResult::fail("image", &e.to_string()),
    }
}

/// One generated script: correct shebang, parses under `sh -n`.
fn check_script(script: &Path) -> CheckResult {
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = match std::fs::read_to_string(script) {
        Ok(c) => c,
        Err(e) => return CheckResult::fail(&name, &format!("unreadable: {}", e)),
    };
    if !content.starts_with("#!/bin/sh\n") {
        return CheckResult::fail(&name, "missing #!/bin/sh shebang");
    }

    // sh -n parses without executing.
    let result = Cmd::new("sh").arg("-n").stdin_file(script).allow_fail().run();
    match result {
        Ok(r) if r.success() => CheckResult::pass(&name),
        Ok(r) => CheckResult::fail(&name, &format!("syntax error: {}", r.stderr_trimmed())),
        Err(e) => CheckResult::fail(&name, &e.to_string()),
    }
}

fn script_paths(media_root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let setups = media_root.join("os-setups");
    if let Ok(entries) = std::fs::read_dir(&setups) {
        for entry in entries.filter_map(|e| e.ok()) {
            if entry.path().extension().map(|e| e == "sh").unwrap_or(false) {
                paths.push(entry.path());
            }
        }
    }
    paths.sort();
    paths
}

/// Secret files must be 0600. FAT32 has no permission bits, so only the
/// staged tree is checked this strictly; on a mounted volume the mode
/// comes from mount options and a mismatch is a warning.
fn check_secret_modes(media_root: &Path) -> CheckResult {
    let mut loose = Vec::new();
    for secret in ["tailscale.key", "wifi.conf"] {
        let path = media_root.join(secret);
        if !path.exists() {
            continue;
        }
        match std::fs::metadata(&path) {
            Ok(meta) => {
                if meta.permissions().mode() & 0o077 != 0 {
                    loose.push(secret);
                }
            }
            Err(_) => loose.push(secret),
        }
    }
    if loose.is_empty() {
        CheckResult::pass("secrets")
    } else {
        CheckResult::warn(
            "secrets",
            &format!("group/world-readable: {}", loose.join(", ")),
        )
    }
}

/// Every file the manifest lists must exist.
fn check_manifest(media_root: &Path) -> CheckResult {
    let manifest = match MediaManifest::load(media_root) {
        Ok(m) => m,
        Err(e) => return CheckResult::fail("manifest", &e.to_string()),
    };

    let missing: Vec<&String> = manifest
        .files
        .iter()
        .filter(|f| !media_root.join(f).exists())
        .collect();
    if missing.is_empty() {
        CheckResult::pass_with(
            "manifest",
            &format!("{} files, os={}", manifest.files.len(), manifest.os),
        )
    } else {
        let listing: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
        CheckResult::fail("manifest", &format!("listed but missing: {}", listing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::partition::ReservePolicy;
    use crate::preflight::CheckStatus;
    use std::fs;

    fn staged_media(dir: &Path) -> PathBuf {
        let media_root = dir.join("media-root");
        let mut config = Config::load(dir);
        config.image_name = "haos_rpi5-64-16.0.img.xz".to_string();
        config.wifi_ssid = Some("net".to_string());
        config.wifi_password = Some("pass".to_string());
        config.tailscale_key_file = None;
        config.ssh_pubkey_file = None;
        crate::media::stage_generated(&media_root, &config, &ReservePolicy::default()).unwrap();

        // Firmware files install normally copies from the clone.
        for file in BOOT_FILES {
            fs::write(media_root.join(file), b"bin").unwrap();
        }

        // A real packed initramfs, with a shell script standing in for
        // the busybox binary.
        let busybox = dir.join("busybox");
        fs::write(&busybox, "#!/bin/sh\nexit 0\n").unwrap();
        let output = dir.join("output");
        fs::create_dir_all(&output).unwrap();
        let image =
            crate::initramfs::build_initramfs(&output, &busybox, "#!/bin/sh\necho hi\n", None)
                .unwrap();
        fs::copy(&image, media_root.join(INITRAMFS_FILENAME)).unwrap();

        let manifest = crate::media::collect_manifest(&media_root, &config, None).unwrap();
        manifest.save(&media_root).unwrap();
        media_root
    }

    #[test]
    fn test_firmware_check_passes_on_staged_tree() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        assert_eq!(check_firmware(&media_root).status, CheckStatus::Pass);
    }

    #[test]
    fn test_firmware_check_names_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        fs::remove_file(media_root.join("kernel_2712.img")).unwrap();

        let result = check_firmware(&media_root);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("kernel_2712.img"));
    }

    #[test]
    fn test_generated_scripts_parse() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());

        let scripts = script_paths(&media_root);
        assert_eq!(scripts.len(), 3);
        for script in scripts {
            let result = check_script(&script);
            assert_eq!(
                result.status,
                CheckStatus::Pass,
                "{:?}: {:?}",
                result.name,
                result.details
            );
        }
    }

    #[test]
    fn test_script_check_rejects_bad_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.sh");
        fs::write(&script, "#!/bin/sh\nif then fi\n").unwrap();
        assert_eq!(check_script(&script).status, CheckStatus::Fail);
    }

    #[test]
    fn test_script_check_rejects_wrong_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bash.sh");
        fs::write(&script, "#!/bin/bash\necho hi\n").unwrap();
        let result = check_script(&script);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("shebang"));
    }

    #[test]
    fn test_missing_image_is_warning_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        assert_eq!(check_image(&media_root).status, CheckStatus::Warn);
    }

    #[test]
    fn test_corrupt_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        fs::write(media_root.join("haos_rpi5-64-16.0.img.xz"), b"not xz data").unwrap();
        assert_eq!(check_image(&media_root).status, CheckStatus::Fail);
    }

    #[test]
    fn test_manifest_detects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        fs::remove_file(media_root.join("cmdline.txt")).unwrap();

        let result = check_manifest(&media_root);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("cmdline.txt"));
    }

    #[test]
    fn test_secret_modes_warn_when_loose() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());
        let wifi = media_root.join("wifi.conf");
        let mut perms = fs::metadata(&wifi).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&wifi, perms).unwrap();

        assert_eq!(check_secret_modes(&media_root).status, CheckStatus::Warn);
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let dir = tempfile::tempdir().unwrap();
        let media_root = staged_media(dir.path());

        let serial = validate_media(&media_root, false).unwrap();
        let parallel = validate_media(&media_root, true).unwrap();
        assert_eq!(serial.checks.len(), parallel.checks.len());
        assert_eq!(serial.fail_count(), parallel.fail_count());
        assert_eq!(serial.fail_count(), 0);
    }
}

//! Property tests over the generated shell scripts.
//!
//! Every script that will run on the Pi is rendered and checked as a
//! whole: busybox-safe syntax, strict-mode headers, no swallowed
//! partition errors, and policy arithmetic matching the Rust planner.

use regex::Regex;
use std::fs;
use std::process::{Command, Stdio};

use pimedia::osimage::OsKind;
use pimedia::partition::ReservePolicy;
use pimedia::scripts::init::render_init_script;
use pimedia::scripts::setup::{render_all, render_setup_script};

/// All scripts the media carries, by name.
fn all_scripts() -> Vec<(String, String)> {
    let policy = ReservePolicy::default();
    let mut scripts: Vec<(String, String)> = render_all(&policy)
        .into_iter()
        .map(|s| (s.filename, s.content))
        .collect();
    scripts.push((
        "init".to_string(),
        render_init_script("PIMEDIA", "/dev/nvme0n1"),
    ));
    scripts
}

/// Parse a script with `sh -n` without executing it.
fn sh_parses(content: &str) -> bool {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("script.sh");
    fs::write(&path, content).expect("write script");

    Command::new("sh")
        .arg("-n")
        .arg(&path)
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[test]
fn test_every_script_parses_under_sh() {
    for (name, content) in all_scripts() {
        assert!(sh_parses(&content), "{} has a syntax error", name);
    }
}

#[test]
fn test_every_script_is_strict_posix_sh() {
    for (name, content) in all_scripts() {
        assert!(
            content.starts_with("#!/bin/sh\nset -eu\n"),
            "{} must start with the strict header",
            name
        );
        // Exactly one shebang; a second one means a fragment brought
        // its own header along.
        assert_eq!(
            content.matches("#!/bin/sh").count(),
            1,
            "{} has a duplicated shebang",
            name
        );
        assert!(
            !content.contains("pipefail"),
            "{} uses non-POSIX pipefail",
            name
        );
    }
}

#[test]
fn test_no_script_swallows_errors_with_or_true() {
    let or_true = Regex::new(r"\|\|\s*true\b").unwrap();
    for (name, content) in all_scripts() {
        assert!(
            !or_true.is_match(&content),
            "{} swallows errors with '|| true'",
            name
        );
    }
}

#[test]
fn test_heredocs_are_terminated() {
    for (name, content) in all_scripts() {
        let opened = content.matches("<<EOF").count();
        let closed = content.lines().filter(|l| l.trim_end() == "EOF").count();
        assert_eq!(opened, closed, "{} has an unterminated heredoc", name);
    }
}

#[test]
fn test_carve_arithmetic_matches_planner() {
    let policy = ReservePolicy::default();
    let script = render_setup_script(OsKind::Ubuntu, &policy);

    // The shell must compute with exactly the planner's constants.
    let percent = Regex::new(r"reserve=\$\(\(total \* (\d+) / 100\)\)").unwrap();
    let captured = percent
        .captures(&script)
        .expect("reserve arithmetic present");
    assert_eq!(captured[1].parse::<u64>().unwrap(), policy.percent);

    assert!(script.contains(&format!("-lt {}", policy.floor_mb)));
    assert!(script.contains(&format!("-le {}", policy.min_spare_mb)));
}

#[test]
fn test_setup_scripts_carve_with_their_os_label() {
    let policy = ReservePolicy::default();
    for (kind, label) in [(OsKind::Haos, "HAOS_DATA"), (OsKind::Ubuntu, "UBUNTU_HOME")] {
        let script = render_setup_script(kind, &policy);
        assert!(
            script.contains(&format!("carve_spare \"$TARGET_DEVICE\" {}", label)),
            "{} setup must carve {}",
            kind.name(),
            label
        );
    }
}

#[test]
fn test_unknown_setup_touches_nothing() {
    let script = render_setup_script(OsKind::Unknown, &ReservePolicy::default());
    for tool in ["parted", "mkfs", "mount", "dd"] {
        assert!(
            !script.contains(tool),
            "unknown-OS setup must not invoke {}",
            tool
        );
    }
}

#[test]
fn test_init_quotes_label_and_target() {
    // Labels and device paths come from user configuration; a space or
    // quote in either must not split the command line.
    let script = render_init_script("MY LABEL", "/dev/disk/by-id/odd name");
    assert!(script.contains("findfs LABEL='MY LABEL'"));
    assert!(script.contains("target='/dev/disk/by-id/odd name'"));
    assert!(sh_parses(&script));
}

#[test]
fn test_scripts_only_use_staged_applets() {
    // Commands invoked bare in init must exist as busybox applet links
    // (the setup scripts additionally get parted/mkfs.ext4 as extras).
    let applets = pimedia::initramfs::applet_links();
    let init = render_init_script("PIMEDIA", "/dev/nvme0n1");

    for required in [
        "findfs", "mount", "umount", "xz", "dd", "sync", "blockdev", "poweroff", "basename",
        "head", "find",
    ] {
        assert!(
            init.contains(required),
            "expected init to use {}, update this list if it stopped",
            required
        );
        assert!(
            applets.contains(&required),
            "init uses {} but no applet link is staged",
            required
        );
    }
}

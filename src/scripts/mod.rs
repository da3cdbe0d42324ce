//! Generated shell artifacts.
//!
//! The boot-time installer on the Pi is plain POSIX shell running under
//! busybox, so everything it executes is rendered here as strings. Policy
//! constants (reservation percentage, floor, minimum spare size) are
//! injected from [`crate::partition::ReservePolicy`] so the shell
//! arithmetic can never drift from the planner the tests exercise.

pub mod init;
pub mod setup;

use crate::partition::ReservePolicy;

/// Every generated script starts with this. `set -eu` only: pipefail is
/// not POSIX and busybox sh does not have it.
pub const SH_HEADER: &str = "#!/bin/sh\nset -eu\n";

/// A rendered script ready to be written to the media.
#[derive(Debug, Clone)]
pub struct Script {
    pub filename: String,
    pub content: String,
}

/// Quote a value for safe embedding in single quotes in sh.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell helper: device node of partition $2 on disk $1
/// (nvme0n1 -> nvme0n1p2, sda -> sda2).
pub fn part_dev_fn() -> &'static str {
    "\
part_dev() {
    case \"$1\" in
        *[0-9]) printf '%sp%s' \"$1\" \"$2\" ;;
        *) printf '%s%s' \"$1\" \"$2\" ;;
    esac
}
"
}

/// Shell helper: locate the root partition of a flashed image. Tries the
/// conventional index first, then the largest partition over 500 MB.
/// Prints the device node or returns 1.
///
/// Reads sysfs instead of asking parted so it works in the busybox-only
/// initramfs; sysfs sizes are 512-byte sectors, hence the /2048.
pub fn find_root_part_fn() -> &'static str {
    "\
find_root_part() {
    dev=\"$1\"
    preferred=\"${2:-}\"
    disk=\"$(basename \"$dev\")\"
    if [ -n \"$preferred\" ]; then
        cand=\"$(part_dev \"$dev\" \"$preferred\")\"
        if [ -b \"$cand\" ]; then
            printf '%s' \"$cand\"
            return 0
        fi
    fi
    best_mb=0
    best=\"\"
    for p in \"/sys/block/$disk\"/\"$disk\"*; do
        [ -e \"$p/partition\" ] || continue
        sectors=\"$(cat \"$p/size\" 2>/dev/null || echo 0)\"
        mb=$((sectors / 2048))
        if [ \"$mb\" -gt 500 ] && [ \"$mb\" -gt \"$best_mb\" ]; then
            best_mb=\"$mb\"
            best=\"/dev/$(basename \"$p\")\"
        fi
    done
    [ -n \"$best\" ] || return 1
    printf '%s' \"$best\"
}
"
}

/// Shell fragment: carve a spare partition out of the unallocated tail of
/// disk $1 and format it ext4 with label $2.
///
/// Skips idempotently when the label already exists (reflash case), skips
/// when the leftover after the reserve is too small, and on a failed
/// create/format warns and returns success so the installer keeps going
/// without pretending the partition exists.
pub fn carve_spare_fn(policy: &ReservePolicy) -> String {
    format!(
        "\
carve_spare() {{
    dev=\"$1\"
    label=\"$2\"

    if blkid -L \"$label\" >/dev/null 2>&1; then
        echo \"Spare partition '$label' already exists, skipping\"
        return 0
    fi

    table=\"$(parted -sm \"$dev\" unit MB print)\"
    total=\"$(printf '%s\\n' \"$table\" | awk -F: '/^\\// {{ sub(\"MB\",\"\",$2); print int($2) }}')\"
    last_end=\"$(printf '%s\\n' \"$table\" | awk -F: '
        $1 ~ /^[0-9]+$/ {{ sub(\"MB\",\"\",$3); if (int($3) > e) e=int($3) }}
        END {{ print e+0 }}')\"

    reserve=$((total * {percent} / 100))
    if [ \"$reserve\" -lt {floor} ]; then
        reserve={floor}
    fi
    avail=$((total - last_end - reserve))
    if [ \"$avail\" -le {min_spare} ]; then
        echo \"Only ${{avail}}MB free after reserve, not carving '$label'\"
        return 0
    fi

    end=$((total - reserve))
    if ! parted -s \"$dev\" mkpart primary ext4 \"${{last_end}}MB\" \"${{end}}MB\"; then
        echo \"WARNING: could not create spare partition '$label', skipping\" >&2
        return 0
    fi
    if ! blockdev --rereadpt \"$dev\" 2>/dev/null; then
        echo \"WARNING: partition table re-read failed on $dev\" >&2
    fi
    sleep 2

    idx=\"$(parted -sm \"$dev\" print | awk -F: '$1 ~ /^[0-9]+$/ {{ i=$1 }} END {{ print i }}')\"
    part=\"$(part_dev \"$dev\" \"$idx\")\"
    if ! mkfs.ext4 -q -L \"$label\" \"$part\"; then
        echo \"WARNING: could not format spare partition '$label' ($part)\" >&2
        return 0
    fi
    echo \"Spare partition '$label' created at $part\"
}}
",
        percent = policy.percent,
        floor = policy.floor_mb,
        min_spare = policy.min_spare_mb,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("mywifi"), "'mywifi'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_carve_fragment_embeds_policy() {
        let fragment = carve_spare_fn(&ReservePolicy::default());
        assert!(fragment.contains("total * 20 / 100"));
        assert!(fragment.contains("-lt 4096"));
        assert!(fragment.contains("-le 1024"));
    }

    #[test]
    fn test_carve_fragment_is_idempotent_and_loud() {
        let fragment = carve_spare_fn(&ReservePolicy::default());
        // Reflash probe before creation.
        assert!(fragment.contains("blkid -L"));
        // Failures warn instead of being silently swallowed.
        assert!(fragment.contains("WARNING"));
        assert!(!fragment.contains("|| true"));
    }

    #[test]
    fn test_find_root_part_fallback_threshold() {
        // Preferred index first, then largest partition over 500 MB.
        let fragment = find_root_part_fn();
        assert!(fragment.contains("-gt 500"));
        assert!(fragment.contains("sectors / 2048"));
    }
}

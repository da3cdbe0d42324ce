//! The `/init` script packed into the installer initramfs.
//!
//! Runs as PID 1 under busybox on the Pi: finds the installer media by
//! volume label, flashes the image onto the target device, then hands the
//! per-OS setup script its positional arguments.

use super::{shell_quote, SH_HEADER};

/// Render the init script.
///
/// `volume_label` must match what the host-side `install` command used to
/// format the media; `target_device` is the preferred flash target with a
/// largest-other-disk fallback when it is absent.
pub fn render_init_script(volume_label: &str, target_device: &str) -> String {
    let label = shell_quote(volume_label);
    let target = shell_quote(target_device);

    format!(
        "{header}\
# Installer initramfs init. Runs as PID 1.

fail() {{
    echo \"ERROR: $1\" >&2
    echo \"Dropping to a shell for debugging.\" >&2
    exec sh
}}

mount -t proc proc /proc
mount -t sysfs sysfs /sys
if ! mountpoint -q /dev; then
    mount -t devtmpfs devtmpfs /dev
fi

# Let USB enumeration and device nodes settle.
sleep 3

media_part=\"\"
for attempt in 1 2 3 4 5; do
    media_part=\"$(findfs LABEL={label} 2>/dev/null)\" && break
    echo \"Waiting for installer media (attempt $attempt)...\"
    sleep 2
done
[ -n \"$media_part\" ] || fail \"installer media labeled {label} not found\"

mkdir -p /media
mount -o ro \"$media_part\" /media || fail \"could not mount $media_part\"

img=\"$(find /media -maxdepth 1 -name '*.img.xz' | head -n 1)\"
[ -n \"$img\" ] || fail \"no *.img.xz image on the installer media\"
img_name=\"$(basename \"$img\")\"

case \"$img_name\" in
    haos_*) os=haos ;;
    ubuntu-*) os=ubuntu ;;
    *) os=unknown ;;
esac
echo \"Image: $img_name (os: $os)\"

target={target}
if [ ! -b \"$target\" ]; then
    echo \"$target not present, looking for the largest other disk...\"
    # Reverse of partition naming: nvme0n1p1/mmcblk0p1 keep the digit
    # before the p separator, sda1 just drops the trailing digits.
    media_disk=\"$(basename \"$media_part\")\"
    case \"$media_disk\" in
        *[0-9]p[0-9]*) media_disk=\"${{media_disk%p[0-9]*}}\" ;;
        *) media_disk=\"${{media_disk%%[0-9]*}}\" ;;
    esac
    best_size=0
    best=\"\"
    for sys in /sys/block/*; do
        name=\"$(basename \"$sys\")\"
        case \"$name\" in
            loop*|ram*|zram*) continue ;;
        esac
        [ \"$name\" = \"$media_disk\" ] && continue
        size=\"$(cat \"$sys/size\" 2>/dev/null || echo 0)\"
        if [ \"$size\" -gt \"$best_size\" ]; then
            best_size=\"$size\"
            best=\"/dev/$name\"
        fi
    done
    [ -n \"$best\" ] || fail \"no flash target found\"
    target=\"$best\"
fi
echo \"Target device: $target\"

echo \"Flashing $img_name to $target...\"
xz -dc \"$img\" | dd of=\"$target\" bs=4M conv=fsync
sync
if ! blockdev --rereadpt \"$target\" 2>/dev/null; then
    echo \"WARNING: partition table re-read failed, relying on the settle delay\" >&2
fi
# New partition device nodes need a moment after the table re-read.
sleep 3

wifi_ssid=\"\"
wifi_password=\"\"
if [ -f /media/wifi.conf ]; then
    . /media/wifi.conf
fi
ts_key=\"\"
if [ -f /media/tailscale.key ]; then
    ts_key=\"$(cat /media/tailscale.key)\"
fi

setup=\"/media/os-setups/setup_${{os}}.sh\"
if [ -f \"$setup\" ]; then
    echo \"Running setup_${{os}}.sh...\"
    sh \"$setup\" /media \"$ts_key\" \"$wifi_ssid\" \"$wifi_password\" \"$target\" \\
        || fail \"setup_${{os}}.sh failed\"
else
    echo \"No setup script for '$os', flash only\"
fi

umount /media
sync
echo \"Installation complete. Remove the installer media and power cycle.\"
poweroff -f
",
        header = SH_HEADER,
        label = label,
        target = target,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_script_basics() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");
        assert!(script.starts_with("#!/bin/sh\nset -eu\n"));
        assert!(script.contains("findfs LABEL='PIMEDIA'"));
        assert!(script.contains("target='/dev/nvme0n1'"));
    }

    #[test]
    fn test_init_script_flashes_and_settles() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");
        assert!(script.contains("xz -dc \"$img\" | dd of=\"$target\" bs=4M conv=fsync"));
        assert!(script.contains("if ! blockdev --rereadpt"));
        assert!(script.contains("sleep 3"));
    }

    #[test]
    fn test_init_script_os_detection_matches_rust_mapping() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");
        assert!(script.contains("haos_*) os=haos"));
        assert!(script.contains("ubuntu-*) os=ubuntu"));
        assert!(script.contains("*) os=unknown"));
    }

    #[test]
    fn test_init_script_positional_setup_args() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");
        assert!(script
            .contains("sh \"$setup\" /media \"$ts_key\" \"$wifi_ssid\" \"$wifi_password\" \"$target\""));
    }

    #[test]
    fn test_init_script_excludes_media_disk_from_fallback() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");
        assert!(script.contains("[ \"$name\" = \"$media_disk\" ] && continue"));
    }

    #[test]
    fn test_media_disk_derivation_per_device_naming_style() {
        let script = render_init_script("PIMEDIA", "/dev/nvme0n1");

        // Run the rendered derivation fragment as-is under sh. An
        // over-stripped name (mmcblk0p1 -> mmcblk) would let the fallback
        // pick the installer medium itself as the flash target.
        let start = script.find("media_disk=").unwrap();
        let end = start + script[start..].find("esac").unwrap() + "esac".len();
        let fragment = &script[start..end];

        for (media_part, expected) in [
            ("/dev/mmcblk0p1", "mmcblk0"),
            ("/dev/nvme0n1p1", "nvme0n1"),
            ("/dev/sda1", "sda"),
        ] {
            let program = format!(
                "media_part={}\n{}\nprintf '%s' \"$media_disk\"",
                media_part, fragment
            );
            let out = std::process::Command::new("sh")
                .arg("-c")
                .arg(&program)
                .output()
                .unwrap();
            assert!(out.status.success(), "fragment failed for {}", media_part);
            assert_eq!(
                String::from_utf8_lossy(&out.stdout),
                expected,
                "wrong disk for {}",
                media_part
            );
        }
    }
}

//! Per-OS post-install setup scripts for `os-setups/` on the media.
//!
//! Each script receives the same positional arguments from the init
//! script: `<media_root> <tailscale_key> <wifi_ssid> <wifi_password>
//! <target_device>`. They run inside the initramfs after flashing, with
//! the freshly written OS still unbooted, so all configuration happens by
//! mounting its partitions and writing files.

use crate::osimage::OsKind;
use crate::partition::ReservePolicy;

use super::{carve_spare_fn, find_root_part_fn, part_dev_fn, Script, SH_HEADER};

/// Render all setup scripts for the media.
pub fn render_all(policy: &ReservePolicy) -> Vec<Script> {
    OsKind::all()
        .iter()
        .map(|kind| Script {
            filename: format!("setup_{}.sh", kind.name()),
            content: render_setup_script(*kind, policy),
        })
        .collect()
}

/// Render the setup script for one OS kind.
pub fn render_setup_script(kind: OsKind, policy: &ReservePolicy) -> String {
    match kind {
        OsKind::Haos => render_haos(policy),
        OsKind::Ubuntu => render_ubuntu(policy),
        OsKind::Unknown => render_unknown(),
    }
}

fn common_prologue() -> String {
    format!(
        "\
MEDIA_ROOT=\"$1\"
TS_KEY=\"$2\"
WIFI_SSID=\"$3\"
WIFI_PASSWORD=\"$4\"
TARGET_DEVICE=\"$5\"

{part_dev}
{find_root}",
        part_dev = part_dev_fn(),
        find_root = find_root_part_fn(),
    )
}

fn render_haos(policy: &ReservePolicy) -> String {
    let root_index = OsKind::Haos
        .root_partition_index()
        .expect("haos has a conventional index");
    let label = OsKind::Haos.spare_label().expect("haos has a spare label");

    format!(
        "{header}\
# Post-flash setup for Home Assistant OS.

{prologue}
{carve}
data_part=\"$(find_root_part \"$TARGET_DEVICE\" {root_index})\" \\
    || {{ echo \"ERROR: HAOS data partition not found\" >&2; exit 1; }}

mkdir -p /mnt/haos-data
mount \"$data_part\" /mnt/haos-data

# HAOS imports NetworkManager keyfiles from the data partition on first
# boot; the Tailscale add-on picks its auth key up from the same place.
if [ -n \"$WIFI_SSID\" ]; then
    mkdir -p /mnt/haos-data/network
    cat > /mnt/haos-data/network/installer-wifi <<EOF
[connection]
id=installer-wifi
type=wifi

[wifi]
mode=infrastructure
ssid=$WIFI_SSID

[wifi-security]
auth-alg=open
key-mgmt=wpa-psk
psk=$WIFI_PASSWORD

[ipv4]
method=auto

[ipv6]
method=auto
EOF
    chmod 600 /mnt/haos-data/network/installer-wifi
    echo \"WiFi profile for '$WIFI_SSID' staged\"
fi

if [ -n \"$TS_KEY\" ]; then
    mkdir -p /mnt/haos-data/supervisor
    printf '%s\\n' \"$TS_KEY\" > /mnt/haos-data/supervisor/tailscale_authkey
    chmod 600 /mnt/haos-data/supervisor/tailscale_authkey
    echo \"Tailscale auth key staged\"
fi

umount /mnt/haos-data

carve_spare \"$TARGET_DEVICE\" {label}
echo \"HAOS setup complete\"
",
        header = SH_HEADER,
        prologue = common_prologue(),
        carve = carve_spare_fn(policy),
        root_index = root_index,
        label = label,
    )
}

fn render_ubuntu(policy: &ReservePolicy) -> String {
    let root_index = OsKind::Ubuntu
        .root_partition_index()
        .expect("ubuntu has a conventional index");
    let label = OsKind::Ubuntu
        .spare_label()
        .expect("ubuntu has a spare label");

    format!(
        "{header}\
# Post-flash setup for Ubuntu Server (preinstalled arm64+raspi image).

{prologue}
{carve}
root_part=\"$(find_root_part \"$TARGET_DEVICE\" {root_index})\" \\
    || {{ echo \"ERROR: Ubuntu root partition not found\" >&2; exit 1; }}

mkdir -p /mnt/target
mount \"$root_part\" /mnt/target

if [ -f \"$MEDIA_ROOT/authorized_keys\" ]; then
    for home in /mnt/target/root /mnt/target/home/ubuntu; do
        mkdir -p \"$home/.ssh\"
        cat \"$MEDIA_ROOT/authorized_keys\" >> \"$home/.ssh/authorized_keys\"
        chmod 700 \"$home/.ssh\"
        chmod 600 \"$home/.ssh/authorized_keys\"
    done
    # The preinstalled image creates the ubuntu user with uid 1000.
    chown -R 1000:1000 /mnt/target/home/ubuntu/.ssh 2>/dev/null \\
        || echo \"WARNING: could not chown ubuntu .ssh\" >&2
    echo \"SSH authorized_keys installed\"
fi

if [ -n \"$WIFI_SSID\" ]; then
    mkdir -p /mnt/target/etc/netplan
    cat > /mnt/target/etc/netplan/60-installer-wifi.yaml <<EOF
network:
  version: 2
  wifis:
    wlan0:
      dhcp4: true
      access-points:
        \"$WIFI_SSID\":
          password: \"$WIFI_PASSWORD\"
EOF
    chmod 600 /mnt/target/etc/netplan/60-installer-wifi.yaml
    echo \"netplan WiFi config for '$WIFI_SSID' written\"
fi

if [ -n \"$TS_KEY\" ]; then
    mkdir -p /mnt/target/var/lib/tailscale-installer
    printf '%s\\n' \"$TS_KEY\" > /mnt/target/var/lib/tailscale-installer/authkey
    chmod 600 /mnt/target/var/lib/tailscale-installer/authkey

    cat > /mnt/target/etc/systemd/system/tailscale-enroll.service <<EOF
[Unit]
Description=One-shot Tailscale enrollment
After=network-online.target tailscaled.service
Wants=network-online.target
ConditionPathExists=/var/lib/tailscale-installer/authkey

[Service]
Type=oneshot
ExecStart=/bin/sh -c 'tailscale up --authkey \"\\$(cat /var/lib/tailscale-installer/authkey)\" && rm -f /var/lib/tailscale-installer/authkey'
RemainAfterExit=yes

[Install]
WantedBy=multi-user.target
EOF
    mkdir -p /mnt/target/etc/systemd/system/multi-user.target.wants
    ln -sf /etc/systemd/system/tailscale-enroll.service \\
        /mnt/target/etc/systemd/system/multi-user.target.wants/tailscale-enroll.service
    echo \"Tailscale enrollment unit installed\"
fi

carve_spare \"$TARGET_DEVICE\" {label}

# Mount the spare at /home, but only if it actually exists now.
if blkid -L {label} >/dev/null 2>&1; then
    echo \"LABEL={label} /home ext4 defaults,nofail 0 2\" >> /mnt/target/etc/fstab
    echo \"fstab entry for {label} added\"
fi

umount /mnt/target
echo \"Ubuntu setup complete\"
",
        header = SH_HEADER,
        prologue = common_prologue(),
        carve = carve_spare_fn(policy),
        root_index = root_index,
        label = label,
    )
}

fn render_unknown() -> String {
    format!(
        "{header}\
# Generic fallback: the image was flashed, but no OS-specific setup is
# known for it. WiFi, Tailscale, and SSH provisioning were skipped.

echo \"Unknown OS image: flash done, no post-install setup applied\"
exit 0
",
        header = SH_HEADER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReservePolicy {
        ReservePolicy::default()
    }

    #[test]
    fn test_render_all_covers_every_kind() {
        let scripts = render_all(&policy());
        let names: Vec<&str> = scripts.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["setup_haos.sh", "setup_ubuntu.sh", "setup_unknown.sh"]
        );
    }

    #[test]
    fn test_all_scripts_have_strict_header() {
        for script in render_all(&policy()) {
            assert!(
                script.content.starts_with("#!/bin/sh\nset -eu\n"),
                "{} lacks strict header",
                script.filename
            );
        }
    }

    #[test]
    fn test_haos_uses_its_conventions() {
        let script = render_setup_script(OsKind::Haos, &policy());
        assert!(script.contains("find_root_part \"$TARGET_DEVICE\" 8"));
        assert!(script.contains("carve_spare \"$TARGET_DEVICE\" HAOS_DATA"));
        assert!(script.contains("key-mgmt=wpa-psk"));
    }

    #[test]
    fn test_ubuntu_uses_its_conventions() {
        let script = render_setup_script(OsKind::Ubuntu, &policy());
        assert!(script.contains("find_root_part \"$TARGET_DEVICE\" 2"));
        assert!(script.contains("carve_spare \"$TARGET_DEVICE\" UBUNTU_HOME"));
        assert!(script.contains("netplan"));
        assert!(script.contains("tailscale up --authkey"));
    }

    #[test]
    fn test_ubuntu_fstab_guarded_by_label_probe() {
        let script = render_setup_script(OsKind::Ubuntu, &policy());
        let blkid_pos = script
            .find("if blkid -L UBUNTU_HOME")
            .expect("fstab must be guarded");
        let fstab_pos = script.find("etc/fstab").unwrap();
        assert!(blkid_pos < fstab_pos, "label probe must precede fstab write");
        assert!(script.contains("nofail"));
    }

    #[test]
    fn test_unknown_is_a_noop() {
        let script = render_setup_script(OsKind::Unknown, &policy());
        assert!(script.contains("exit 0"));
        assert!(!script.contains("parted"));
        assert!(!script.contains("mkfs"));
    }

    #[test]
    fn test_no_silent_partition_failures() {
        for script in render_all(&policy()) {
            assert!(
                !script.content.contains("parted") || !script.content.contains("|| true"),
                "{} swallows partition errors",
                script.filename
            );
        }
    }
}

//! Spare-partition planning and root-partition heuristics.
//!
//! All sizes are whole megabytes with truncating arithmetic; that matches
//! the coarse granularity `parted` reports with `unit MB` and keeps the
//! numbers identical to what the generated shell fragments compute on the
//! target device.

use anyhow::{bail, Context, Result};

/// How much trailing disk space to keep free for future reflashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservePolicy {
    /// Percentage of the whole disk to reserve.
    pub percent: u64,
    /// Never reserve less than this many MB.
    pub floor_mb: u64,
    /// Don't bother creating a spare partition smaller than this.
    pub min_spare_mb: u64,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            percent: 20,
            floor_mb: 4096,
            min_spare_mb: 1024,
        }
    }
}

impl ReservePolicy {
    /// Reserved tail size for a disk of `total_mb`.
    pub fn reserve_mb(&self, total_mb: u64) -> u64 {
        (total_mb * self.percent / 100).max(self.floor_mb)
    }

    /// Plan a spare partition in the space between the last partition and
    /// the reserved tail. Returns `None` when the leftover is too small to
    /// be useful (which also covers the case where the reserve does not
    /// fit at all).
    pub fn plan_spare(&self, total_mb: u64, last_end_mb: u64) -> Option<SpareRegion> {
        let reserve = self.reserve_mb(total_mb);
        let used = last_end_mb.saturating_add(reserve);
        let available = total_mb.saturating_sub(used);
        if available <= self.min_spare_mb {
            return None;
        }
        Some(SpareRegion {
            start_mb: last_end_mb,
            end_mb: total_mb - reserve,
        })
    }
}

/// A planned spare partition, `[start_mb, end_mb)` on the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpareRegion {
    pub start_mb: u64,
    pub end_mb: u64,
}

impl SpareRegion {
    pub fn size_mb(&self) -> u64 {
        self.end_mb - self.start_mb
    }
}

/// One partition as reported by `parted -sm <dev> unit MB print`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub index: u32,
    pub start_mb: u64,
    pub end_mb: u64,
    /// Filesystem name as printed by parted, empty when unknown.
    pub fs: String,
}

impl PartitionInfo {
    pub fn size_mb(&self) -> u64 {
        self.end_mb.saturating_sub(self.start_mb)
    }
}

/// Parsed view of one disk's partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLayout {
    pub total_mb: u64,
    pub partitions: Vec<PartitionInfo>,
}

impl DiskLayout {
    /// End offset of the last partition, or 1 MB for an empty table so a
    /// created partition never overlaps the partition table itself.
    pub fn last_end_mb(&self) -> u64 {
        self.partitions.iter().map(|p| p.end_mb).max().unwrap_or(1)
    }

    /// Index the next created partition will get.
    pub fn next_index(&self) -> u32 {
        self.partitions.iter().map(|p| p.index).max().unwrap_or(0) + 1
    }
}

/// Partitions smaller than this are never considered a root filesystem.
const ROOT_MIN_MB: u64 = 500;

/// Locate the root partition of a freshly flashed image.
///
/// Image publishers keep a conventional layout, so the preferred index is
/// tried first; if the image gained or lost a partition the largest
/// partition over 500 MB is the best remaining guess. This is a heuristic,
/// not a guarantee.
pub fn pick_root_partition(
    partitions: &[PartitionInfo],
    preferred_index: Option<u32>,
) -> Option<u32> {
    if let Some(idx) = preferred_index {
        if partitions.iter().any(|p| p.index == idx) {
            return Some(idx);
        }
    }
    partitions
        .iter()
        .filter(|p| p.size_mb() > ROOT_MIN_MB)
        .max_by_key(|p| p.size_mb())
        .map(|p| p.index)
}

/// Parse the machine-readable output of `parted -sm <dev> unit MB print`.
///
/// Format: a `BYT;` header, then a disk line
/// `/dev/sda:128000MB:nvme:512:512:gpt:Name:;` and one line per partition
/// `2:8000MB:102400MB:94400MB:ext4::;`.
pub fn parse_parted_machine(output: &str) -> Result<DiskLayout> {
    let mut total_mb = None;
    let mut partitions = Vec::new();

    for line in output.lines() {
        let line = line.trim().trim_end_matches(';');
        if line.is_empty() || line == "BYT" {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            continue;
        }
        if fields[0].starts_with('/') {
            total_mb = Some(parse_mb(fields[1])?);
            continue;
        }
        // Partition line: index:start:end:size:fs:name:flags
        let index: u32 = match fields[0].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        partitions.push(PartitionInfo {
            index,
            start_mb: parse_mb(fields[1])?,
            end_mb: parse_mb(fields[2])?,
            fs: fields.get(4).unwrap_or(&"").to_string(),
        });
    }

    let total_mb = total_mb.context("parted output has no disk line")?;
    Ok(DiskLayout {
        total_mb,
        partitions,
    })
}

/// Parse a parted size field like `128000MB` or `1.05MB` (truncating).
fn parse_mb(field: &str) -> Result<u64> {
    let digits = field.trim().trim_end_matches("MB");
    let whole = digits.split('.').next().unwrap_or("");
    if whole.is_empty() {
        bail!("unparseable size field '{}'", field);
    }
    whole
        .parse::<u64>()
        .with_context(|| format!("unparseable size field '{}'", field))
}

/// Device node for partition `index` of `device`.
///
/// Devices whose name ends in a digit (nvme0n1, mmcblk0, loop0) get a `p`
/// separator; sdX-style names do not.
pub fn partition_device(device: &str, index: u32) -> String {
    let needs_p = device
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);
    if needs_p {
        format!("{}p{}", device, index)
    } else {
        format!("{}{}", device, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReservePolicy {
        ReservePolicy::default()
    }

    #[test]
    fn test_reserve_uses_percentage_when_above_floor() {
        assert_eq!(policy().reserve_mb(128000), 25600);
        assert_eq!(policy().reserve_mb(32000), 6400);
    }

    #[test]
    fn test_reserve_floor_applies_to_small_disks() {
        assert_eq!(policy().reserve_mb(8000), 4096);
        assert_eq!(policy().reserve_mb(0), 4096);
    }

    #[test]
    fn test_plan_skips_when_reserve_consumes_remaining_space() {
        // D=32000, E=30000: R=6400, A=-4400 -> skip
        assert_eq!(policy().plan_spare(32000, 30000), None);
    }

    #[test]
    fn test_plan_creates_large_spare() {
        // D=128000, E=8000: R=25600, A=94400 -> 8000MB..102400MB
        let region = policy().plan_spare(128000, 8000).unwrap();
        assert_eq!(region.start_mb, 8000);
        assert_eq!(region.end_mb, 102400);
        assert_eq!(region.size_mb(), 94400);
    }

    #[test]
    fn test_plan_skips_small_disk_at_floor() {
        // D=8000, E=7500: R=4096 (floor), A=-3596 -> skip
        assert_eq!(policy().plan_spare(8000, 7500), None);
    }

    #[test]
    fn test_plan_skips_sliver() {
        // Available exactly at the threshold is still a skip.
        // D=16000, E=10880: R=4096 (floor beats 3200), A=1024 -> skip
        assert_eq!(policy().plan_spare(16000, 10880), None);
        // One MB more and it goes through.
        let region = policy().plan_spare(16001, 10880).unwrap();
        assert_eq!(region.size_mb(), 1025);
    }

    #[test]
    fn test_pick_root_prefers_index() {
        let parts = vec![
            PartitionInfo {
                index: 1,
                start_mb: 1,
                end_mb: 513,
                fs: "fat32".into(),
            },
            PartitionInfo {
                index: 2,
                start_mb: 513,
                end_mb: 8000,
                fs: "ext4".into(),
            },
        ];
        assert_eq!(pick_root_partition(&parts, Some(2)), Some(2));
    }

    #[test]
    fn test_pick_root_falls_back_to_largest() {
        let parts = vec![
            PartitionInfo {
                index: 1,
                start_mb: 1,
                end_mb: 513,
                fs: "fat32".into(),
            },
            PartitionInfo {
                index: 2,
                start_mb: 513,
                end_mb: 1000,
                fs: "ext4".into(),
            },
            PartitionInfo {
                index: 3,
                start_mb: 1000,
                end_mb: 9000,
                fs: "ext4".into(),
            },
        ];
        // Preferred index 8 does not exist; largest >500MB wins.
        assert_eq!(pick_root_partition(&parts, Some(8)), Some(3));
    }

    #[test]
    fn test_pick_root_ignores_small_partitions() {
        let parts = vec![
            PartitionInfo {
                index: 1,
                start_mb: 1,
                end_mb: 257,
                fs: "fat32".into(),
            },
            PartitionInfo {
                index: 2,
                start_mb: 257,
                end_mb: 400,
                fs: "ext4".into(),
            },
        ];
        assert_eq!(pick_root_partition(&parts, None), None);
    }

    #[test]
    fn test_parse_parted_machine() {
        let output = "BYT;\n\
            /dev/nvme0n1:128000MB:nvme:512:512:gpt:CT500 NVMe:;\n\
            1:1.05MB:513MB:512MB:fat32:EFI:boot, esp;\n\
            2:513MB:8000MB:7487MB:ext4::;\n";
        let layout = parse_parted_machine(output).unwrap();
        assert_eq!(layout.total_mb, 128000);
        assert_eq!(layout.partitions.len(), 2);
        assert_eq!(layout.partitions[0].index, 1);
        assert_eq!(layout.partitions[0].start_mb, 1); // truncated from 1.05
        assert_eq!(layout.partitions[1].end_mb, 8000);
        assert_eq!(layout.partitions[1].fs, "ext4");
        assert_eq!(layout.last_end_mb(), 8000);
        assert_eq!(layout.next_index(), 3);
    }

    #[test]
    fn test_parse_parted_empty_table() {
        let output = "BYT;\n/dev/sda:32000MB:scsi:512:512:gpt::;\n";
        let layout = parse_parted_machine(output).unwrap();
        assert!(layout.partitions.is_empty());
        assert_eq!(layout.last_end_mb(), 1);
        assert_eq!(layout.next_index(), 1);
    }

    #[test]
    fn test_parse_parted_missing_disk_line() {
        assert!(parse_parted_machine("BYT;\n").is_err());
    }

    #[test]
    fn test_partition_device_naming() {
        assert_eq!(partition_device("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_device("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
        assert_eq!(partition_device("/dev/sda", 3), "/dev/sda3");
    }
}

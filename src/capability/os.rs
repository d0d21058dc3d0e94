//! Resctrl filesystem capability probes.
//!
//! # Platform Support
//!
//! - **Linux**: Reads `/sys/fs/resctrl/info/{L3,L2,MB,L3_MON}` and
//!   `/proc/mounts` (controller mode detection)
//! - **Other platforms**: every probe reports the feature absent
//!
//! Parsing is split into pure functions over file contents so the
//! decoding can be tested without a mounted resctrl filesystem.

use std::path::{Path, PathBuf};

use crate::capability::{
    CacheAllocCaps, MbaCaps, MbaController, MonCaps, MonEventKind, MonitorEvent,
};
use crate::error::{QosError, Result};
use crate::topology::{CacheInfo, CpuInfo};

/// Resctrl filesystem mount point.
pub(crate) const RESCTRL_PATH: &str = "/sys/fs/resctrl";

fn info_dir(resource: &str) -> PathBuf {
    Path::new(RESCTRL_PATH).join("info").join(resource)
}

/// Whether the running kernel exposes the resctrl filesystem at all.
pub(crate) fn resctrl_is_supported() -> bool {
    if let Ok(filesystems) = std::fs::read_to_string("/proc/filesystems") {
        if filesystems.lines().any(|l| l.trim_end().ends_with("resctrl")) {
            return true;
        }
    }
    Path::new(RESCTRL_PATH).exists()
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_u32(path: &Path) -> Option<u32> {
    read_trimmed(path)?.parse().ok()
}

fn absent(what: &str) -> QosError {
    QosError::Resource(format!("{what} not exposed by resctrl"))
}

/// Count the ways covered by a hex capacity bitmask string such as
/// `fff` or `0xfff`.
fn parse_cbm_ways(mask: &str) -> Option<u32> {
    let mask = mask.trim().trim_start_matches("0x");
    u64::from_str_radix(mask, 16).ok().map(|m| m.count_ones())
}

/// Parse the hex `shareable_bits` contention mask.
fn parse_contention(mask: &str) -> u64 {
    let mask = mask.trim().trim_start_matches("0x");
    u64::from_str_radix(mask, 16).unwrap_or(0)
}

/// Map `info/L3_MON/mon_features` lines to event kinds.
fn parse_mon_features(contents: &str) -> Vec<MonEventKind> {
    let mut kinds = Vec::new();
    for line in contents.lines() {
        match line.trim() {
            "llc_occupancy" => kinds.push(MonEventKind::LlcOccupancy),
            "mbm_total_bytes" => kinds.push(MonEventKind::TotalMemBw),
            "mbm_local_bytes" => kinds.push(MonEventKind::LocalMemBw),
            _ => {}
        }
    }
    if kinds.contains(&MonEventKind::TotalMemBw) && kinds.contains(&MonEventKind::LocalMemBw) {
        kinds.push(MonEventKind::RemoteMemBw);
    }
    kinds
}

/// Probe one cache allocation resource directory (`L3` or `L2`).
///
/// A kernel mounted with CDP renames the directory to `<res>CODE` /
/// `<res>DATA`; either form means the resource is present, the split
/// form means CDP is enabled.
fn cache_alloc_discover(resource: &str, cache: &CacheInfo) -> Result<CacheAllocCaps> {
    let plain = info_dir(resource);
    let code = info_dir(&format!("{resource}CODE"));

    let (dir, cdp_on) = if plain.is_dir() {
        (plain, false)
    } else if code.is_dir() {
        (code, true)
    } else {
        return Err(absent(&format!("{resource} CAT")));
    };

    let num_classes = read_u32(&dir.join("num_closids"))
        .ok_or_else(|| absent(&format!("{resource} CAT")))?;
    let cbm_mask = read_trimmed(&dir.join("cbm_mask"))
        .ok_or_else(|| absent(&format!("{resource} CAT")))?;
    let num_ways =
        parse_cbm_ways(&cbm_mask).ok_or_else(|| absent(&format!("{resource} CAT")))?;
    let way_contention = read_trimmed(&dir.join("shareable_bits"))
        .map(|s| parse_contention(&s))
        .unwrap_or(0);
    let non_contiguous_cbm = read_u32(&dir.join("sparse_masks")) == Some(1);

    Ok(CacheAllocCaps {
        num_classes,
        num_ways,
        way_size: cache.way_size,
        way_contention,
        // resctrl only reports CDP support indirectly; an enabled mount
        // proves support, otherwise the hardware may still have it.
        cdp: cdp_on,
        cdp_on,
        non_contiguous_cbm,
    })
}

/// Discover L3 CAT through resctrl.
pub(crate) fn l3ca_discover(cpu: &CpuInfo) -> Result<CacheAllocCaps> {
    cache_alloc_discover("L3", &cpu.l3)
}

/// Discover L2 CAT through resctrl.
pub(crate) fn l2ca_discover(cpu: &CpuInfo) -> Result<CacheAllocCaps> {
    cache_alloc_discover("L2", &cpu.l2)
}

/// Discover MBA through resctrl (`info/MB`).
pub(crate) fn mba_discover(_cpu: &CpuInfo) -> Result<MbaCaps> {
    let dir = info_dir("MB");
    if !dir.is_dir() {
        return Err(absent("MBA"));
    }
    let num_classes = read_u32(&dir.join("num_closids")).ok_or_else(|| absent("MBA"))?;
    let throttle_step = read_u32(&dir.join("bandwidth_gran")).ok_or_else(|| absent("MBA"))?;
    let min_bandwidth = read_u32(&dir.join("min_bandwidth")).ok_or_else(|| absent("MBA"))?;
    let is_linear = read_u32(&dir.join("delay_linear")) == Some(1);

    Ok(MbaCaps {
        num_classes,
        throttle_step,
        throttle_max: 100 - min_bandwidth.min(100),
        is_linear,
        // Determined by the supplementary controller mode query.
        ctrl: MbaController::Unknown,
    })
}

/// Discover CMT/MBM monitoring through resctrl (`info/L3_MON`).
pub(crate) fn mon_discover(_cpu: &CpuInfo) -> Result<MonCaps> {
    let dir = info_dir("L3_MON");
    if !dir.is_dir() {
        return Err(absent("monitoring"));
    }
    let features =
        read_trimmed(&dir.join("mon_features")).ok_or_else(|| absent("monitoring"))?;
    let kinds = parse_mon_features(&features);
    if kinds.is_empty() {
        return Err(absent("monitoring"));
    }
    let max_rmid = read_u32(&dir.join("num_rmids"))
        .map(|n| n.saturating_sub(1))
        .unwrap_or(0);

    let events = kinds
        .into_iter()
        .map(|kind| MonitorEvent {
            kind,
            // resctrl reports byte values directly.
            scale_factor: None,
            max_rmid,
            counter_length: 0,
        })
        .collect();
    Ok(MonCaps { events, max_rmid })
}

/// Supplementary query for MBA controller (MBps) mode; returns
/// (supported, enabled).
///
/// Enabled state comes from the `mba_MBps` resctrl mount option. When
/// resctrl is mounted but its mount entry cannot be read, the
/// determination failed and the whole discovery pass must fail with it.
pub(crate) fn mba_ctrl(_cpu: &CpuInfo) -> Result<(bool, bool)> {
    let mounts = std::fs::read_to_string("/proc/mounts").map_err(|e| {
        QosError::Failure(format!("unable to inspect resctrl mount options: {e}"))
    })?;
    let enabled = mounts
        .lines()
        .filter(|l| l.split_whitespace().nth(2) == Some("resctrl"))
        .any(|l| l.contains("mba_MBps"));
    let supported = enabled || info_dir("MB").is_dir();
    Ok((supported, enabled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cbm_ways() {
        assert_eq!(parse_cbm_ways("fff"), Some(12));
        assert_eq!(parse_cbm_ways("0xfff"), Some(12));
        assert_eq!(parse_cbm_ways("7fff\n"), Some(15));
        assert_eq!(parse_cbm_ways("1"), Some(1));
        assert_eq!(parse_cbm_ways("not-a-mask"), None);
    }

    #[test]
    fn test_parse_contention() {
        assert_eq!(parse_contention("c00"), 0xC00);
        assert_eq!(parse_contention("0"), 0);
        assert_eq!(parse_contention("junk"), 0);
    }

    #[test]
    fn test_parse_mon_features_full() {
        let contents = "llc_occupancy\nmbm_total_bytes\nmbm_local_bytes\n";
        let kinds = parse_mon_features(contents);
        assert_eq!(
            kinds,
            vec![
                MonEventKind::LlcOccupancy,
                MonEventKind::TotalMemBw,
                MonEventKind::LocalMemBw,
                MonEventKind::RemoteMemBw,
            ]
        );
    }

    #[test]
    fn test_parse_mon_features_partial() {
        // Remote bandwidth needs both total and local.
        let kinds = parse_mon_features("llc_occupancy\nmbm_total_bytes\n");
        assert!(!kinds.contains(&MonEventKind::RemoteMemBw));
        assert_eq!(kinds.len(), 2);

        assert!(parse_mon_features("").is_empty());
        assert!(parse_mon_features("unknown_feature\n").is_empty());
    }
}

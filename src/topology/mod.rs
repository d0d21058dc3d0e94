//! CPU topology and cache geometry enumeration.
//!
//! # Platform Support
//!
//! - **Linux**: Reads `/proc/cpuinfo` (vendor) and
//!   `/sys/devices/system/cpu/cpu0/cache/` (L2/L3 geometry)
//! - **Other unix**: core count only, vendor unknown
//!
//! The vendor matters only for the memory-bandwidth-allocation backend
//! choice; everything else in the library treats CPUs uniformly.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// CPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vendor {
    Intel,
    Amd,
    Unknown,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intel => write!(f, "Intel"),
            Self::Amd => write!(f, "AMD"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Geometry of one cache level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Whether this cache level was detected at all.
    pub detected: bool,
    /// Number of ways of associativity.
    pub num_ways: u32,
    /// Number of sets.
    pub num_sets: u32,
    /// Number of physical line partitions.
    pub num_partitions: u32,
    /// Cache line size in bytes.
    pub line_size: u32,
    /// Size of one way in bytes.
    pub way_size: u32,
    /// Total cache size in bytes.
    pub total_size: u32,
}

impl CacheInfo {
    /// Build geometry from raw sysfs/CPUID parameters, deriving way and
    /// total sizes.
    pub fn from_geometry(num_ways: u32, num_sets: u32, num_partitions: u32, line_size: u32) -> Self {
        let way_size = line_size * num_sets * num_partitions;
        Self {
            detected: num_ways > 0 && way_size > 0,
            num_ways,
            num_sets,
            num_partitions,
            line_size,
            way_size,
            total_size: way_size * num_ways,
        }
    }
}

/// CPU topology snapshot handed to capability discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    /// CPU vendor.
    pub vendor: Vendor,
    /// Number of logical cores.
    pub num_cores: u32,
    /// Highest logical core id.
    pub max_core_id: u32,
    /// L2 cache geometry (per core/cluster).
    pub l2: CacheInfo,
    /// L3 cache geometry (per socket/complex).
    pub l3: CacheInfo,
}

impl CpuInfo {
    /// Detect the running machine's topology.
    pub fn detect() -> Result<Self> {
        let num_cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        let mut info = Self {
            vendor: Vendor::Unknown,
            num_cores,
            max_core_id: num_cores.saturating_sub(1),
            l2: CacheInfo::default(),
            l3: CacheInfo::default(),
        };

        #[cfg(target_os = "linux")]
        info.detect_linux();

        Ok(info)
    }

    #[cfg(target_os = "linux")]
    fn detect_linux(&mut self) {
        if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
            self.vendor = vendor_from_cpuinfo(&cpuinfo);
        }

        let base = std::path::Path::new("/sys/devices/system/cpu/cpu0/cache");
        let Ok(entries) = std::fs::read_dir(base) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let level = read_trimmed(&path.join("level"));
            let cache_type = read_trimmed(&path.join("type"));
            if cache_type == "Instruction" {
                continue;
            }
            let geometry = CacheInfo::from_geometry(
                read_u32(&path.join("ways_of_associativity")),
                read_u32(&path.join("number_of_sets")),
                read_u32(&path.join("physical_line_partition")).max(1),
                read_u32(&path.join("coherency_line_size")),
            );
            match level.as_str() {
                "2" => self.l2 = geometry,
                "3" => self.l3 = geometry,
                _ => {}
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn read_trimmed(path: &std::path::Path) -> String {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(target_os = "linux")]
fn read_u32(path: &std::path::Path) -> u32 {
    read_trimmed(path).parse().unwrap_or(0)
}

/// Map a `/proc/cpuinfo` vendor string to a [`Vendor`].
fn vendor_from_cpuinfo(cpuinfo: &str) -> Vendor {
    for line in cpuinfo.lines() {
        if let Some(value) = line.strip_prefix("vendor_id") {
            let value = value.trim_start_matches([' ', '\t', ':']).trim();
            return match value {
                "GenuineIntel" => Vendor::Intel,
                "AuthenticAMD" => Vendor::Amd,
                _ => Vendor::Unknown,
            };
        }
    }
    Vendor::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let info = CpuInfo::detect().unwrap();
        assert!(info.num_cores >= 1);
        assert!(info.max_core_id < info.num_cores);
    }

    #[test]
    fn test_vendor_from_cpuinfo() {
        let intel = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: test\n";
        assert_eq!(vendor_from_cpuinfo(intel), Vendor::Intel);
        let amd = "processor\t: 0\nvendor_id\t: AuthenticAMD\n";
        assert_eq!(vendor_from_cpuinfo(amd), Vendor::Amd);
        assert_eq!(vendor_from_cpuinfo("vendor_id\t: SomethingElse\n"), Vendor::Unknown);
        assert_eq!(vendor_from_cpuinfo(""), Vendor::Unknown);
    }

    #[test]
    fn test_cache_geometry() {
        // 12-way, 16384 sets, 64-byte lines: 1 MiB ways, 12 MiB total.
        let cache = CacheInfo::from_geometry(12, 16384, 1, 64);
        assert!(cache.detected);
        assert_eq!(cache.way_size, 1024 * 1024);
        assert_eq!(cache.total_size, 12 * 1024 * 1024);
    }

    #[test]
    fn test_cache_geometry_undetected() {
        let cache = CacheInfo::from_geometry(0, 0, 1, 0);
        assert!(!cache.detected);
    }

    #[test]
    fn test_cpuinfo_serialization() {
        let info = CpuInfo {
            vendor: Vendor::Amd,
            num_cores: 16,
            max_core_id: 15,
            l2: CacheInfo::from_geometry(8, 1024, 1, 64),
            l3: CacheInfo::from_geometry(16, 32768, 1, 64),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("Amd"));
        let back: CpuInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_cores, 16);
        assert_eq!(back.l3.num_ways, 16);
    }
}

//! Capability discovery — CAT, MBA and CMT/MBM feature probing and the
//! aggregated capability snapshot.
//!
//! Each feature family is probed through exactly one backend, selected
//! by the resolved interface and, for memory bandwidth allocation, the
//! CPU vendor. A probe either populates a descriptor, reports the
//! feature absent (tolerated), or fails hard (fatal for the whole
//! discovery pass).

pub(crate) mod hw;
pub(crate) mod os;

use serde::{Deserialize, Serialize};

use crate::error::{QosError, Result};
use crate::interface::Interface;
use crate::topology::{CpuInfo, Vendor};

/// Cache allocation (CAT) capabilities, L2 or L3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheAllocCaps {
    /// Number of classes of service.
    pub num_classes: u32,
    /// Number of cache ways a capacity bitmask can cover.
    pub num_ways: u32,
    /// Size of one cache way in bytes.
    pub way_size: u32,
    /// Bitmask of ways contended with other agents (e.g. graphics).
    pub way_contention: u64,
    /// Whether code/data prioritization is supported.
    pub cdp: bool,
    /// Whether code/data prioritization is currently enabled.
    pub cdp_on: bool,
    /// Whether non-contiguous capacity bitmasks are accepted.
    pub non_contiguous_cbm: bool,
}

/// Memory bandwidth controller (MBps) mode state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbaController {
    /// Not determined for this backend/vendor.
    #[default]
    Unknown,
    /// Controller mode is not supported.
    Unsupported,
    /// Controller mode is supported.
    Supported {
        /// Whether it is currently enabled.
        enabled: bool,
    },
}

impl std::fmt::Display for MbaController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MbaController::Unknown => write!(f, "unknown"),
            MbaController::Unsupported => write!(f, "unsupported"),
            MbaController::Supported { enabled: true } => write!(f, "supported, enabled"),
            MbaController::Supported { enabled: false } => write!(f, "supported, disabled"),
        }
    }
}

/// Memory bandwidth allocation (MBA) capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MbaCaps {
    /// Number of classes of service.
    pub num_classes: u32,
    /// Throttling granularity in percent.
    pub throttle_step: u32,
    /// Maximum throttling value in percent.
    pub throttle_max: u32,
    /// Whether throttling scales linearly.
    pub is_linear: bool,
    /// Bandwidth controller (MBps) mode.
    pub ctrl: MbaController,
}

/// Performance-counter-derived monitoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerfEvent {
    LlcMisses,
    LlcReferences,
    Ipc,
}

/// Monitoring event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonEventKind {
    /// LLC occupancy (CMT).
    LlcOccupancy,
    /// Local memory bandwidth (MBM).
    LocalMemBw,
    /// Total memory bandwidth (MBM).
    TotalMemBw,
    /// Remote memory bandwidth, calculated from total minus local.
    RemoteMemBw,
    /// Event sourced from performance counters.
    Perf(PerfEvent),
}

/// A single supported monitoring event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// Event kind.
    pub kind: MonEventKind,
    /// Counter-to-bytes scale factor, when the counter needs upscaling.
    pub scale_factor: Option<u32>,
    /// Maximum resource monitoring id usable with this event.
    pub max_rmid: u32,
    /// Counter bit width.
    pub counter_length: u32,
}

/// Monitoring (CMT/MBM) capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonCaps {
    /// Supported monitoring events.
    pub events: Vec<MonitorEvent>,
    /// Maximum resource monitoring id across all events.
    pub max_rmid: u32,
}

/// One discovered feature family with its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Capability {
    Monitoring(MonCaps),
    L3Cat(CacheAllocCaps),
    L2Cat(CacheAllocCaps),
    Mba(MbaCaps),
}

/// Aggregated capability snapshot — at most one entry per family, and a
/// successfully discovered snapshot is never empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    entries: Vec<Capability>,
}

impl Capabilities {
    /// All discovered entries, in discovery order.
    pub fn entries(&self) -> &[Capability] {
        &self.entries
    }

    /// Number of discovered feature families.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn push_for_test(&mut self, entry: Capability) {
        self.entries.push(entry);
    }

    /// Monitoring capabilities, if discovered.
    pub fn monitoring(&self) -> Option<&MonCaps> {
        self.entries.iter().find_map(|c| match c {
            Capability::Monitoring(m) => Some(m),
            _ => None,
        })
    }

    /// L3 CAT capabilities, if discovered.
    pub fn l3cat(&self) -> Option<&CacheAllocCaps> {
        self.entries.iter().find_map(|c| match c {
            Capability::L3Cat(l3) => Some(l3),
            _ => None,
        })
    }

    /// L2 CAT capabilities, if discovered.
    pub fn l2cat(&self) -> Option<&CacheAllocCaps> {
        self.entries.iter().find_map(|c| match c {
            Capability::L2Cat(l2) => Some(l2),
            _ => None,
        })
    }

    /// MBA capabilities, if discovered.
    pub fn mba(&self) -> Option<&MbaCaps> {
        self.entries.iter().find_map(|c| match c {
            Capability::Mba(mba) => Some(mba),
            _ => None,
        })
    }
}

/// Per-(feature, backend) probe functions. Implemented by
/// [`PlatformProbes`] against the real machine and mocked in tests.
pub(crate) trait CapProbes {
    fn hw_mon(&self, cpu: &CpuInfo) -> Result<MonCaps>;
    fn os_mon(&self, cpu: &CpuInfo) -> Result<MonCaps>;
    fn hw_l3ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps>;
    fn os_l3ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps>;
    fn hw_l2ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps>;
    fn os_l2ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps>;
    fn hw_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps>;
    fn amd_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps>;
    fn os_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps>;
    /// Supplementary resctrl query for MBA controller (MBps) mode;
    /// returns (supported, enabled).
    fn os_mba_ctrl(&self, cpu: &CpuInfo) -> Result<(bool, bool)>;
}

/// Probes wired to the real MSR and resctrl backends.
pub(crate) struct PlatformProbes;

impl CapProbes for PlatformProbes {
    fn hw_mon(&self, cpu: &CpuInfo) -> Result<MonCaps> {
        hw::mon_discover(cpu)
    }
    fn os_mon(&self, cpu: &CpuInfo) -> Result<MonCaps> {
        os::mon_discover(cpu)
    }
    fn hw_l3ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps> {
        hw::l3ca_discover(cpu)
    }
    fn os_l3ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps> {
        os::l3ca_discover(cpu)
    }
    fn hw_l2ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps> {
        hw::l2ca_discover(cpu)
    }
    fn os_l2ca(&self, cpu: &CpuInfo) -> Result<CacheAllocCaps> {
        os::l2ca_discover(cpu)
    }
    fn hw_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps> {
        hw::mba_discover(cpu)
    }
    fn amd_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps> {
        hw::amd_mba_discover(cpu)
    }
    fn os_mba(&self, cpu: &CpuInfo) -> Result<MbaCaps> {
        os::mba_discover(cpu)
    }
    fn os_mba_ctrl(&self, cpu: &CpuInfo) -> Result<(bool, bool)> {
        os::mba_ctrl(cpu)
    }
}

/// Backend choice for cache allocation probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheBackend {
    Hw,
    Os,
}

/// Backend choice for bandwidth allocation probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MbaBackend {
    Hw,
    Amd,
    Os,
}

/// Select the cache allocation backend for a concrete interface.
pub(crate) fn cache_backend(interface: Interface) -> Result<CacheBackend> {
    match interface {
        Interface::Msr => Ok(CacheBackend::Hw),
        Interface::Os | Interface::OsResctrlMon => Ok(CacheBackend::Os),
        Interface::Auto => {
            log::error!("cache allocation discovery requires a concrete interface");
            Err(QosError::Param(
                "cache allocation discovery requires a concrete interface".to_string(),
            ))
        }
    }
}

/// Select the bandwidth allocation backend for a concrete interface and
/// vendor. Only the MSR interface branches on vendor.
pub(crate) fn mba_backend(interface: Interface, vendor: Vendor) -> Result<MbaBackend> {
    match interface {
        Interface::Msr => match vendor {
            Vendor::Amd => Ok(MbaBackend::Amd),
            _ => Ok(MbaBackend::Hw),
        },
        Interface::Os | Interface::OsResctrlMon => Ok(MbaBackend::Os),
        Interface::Auto => {
            log::error!("bandwidth allocation discovery requires a concrete interface");
            Err(QosError::Param(
                "bandwidth allocation discovery requires a concrete interface".to_string(),
            ))
        }
    }
}

/// Discover monitoring (CMT/MBM) capabilities through `interface`.
pub(crate) fn discover_mon<P: CapProbes>(
    probes: &P,
    cpu: &CpuInfo,
    interface: Interface,
) -> Result<MonCaps> {
    match cache_backend(interface)? {
        CacheBackend::Hw => probes.hw_mon(cpu),
        CacheBackend::Os => probes.os_mon(cpu),
    }
}

/// Discover L3 cache allocation capabilities through `interface`.
pub(crate) fn discover_l3ca<P: CapProbes>(
    probes: &P,
    cpu: &CpuInfo,
    interface: Interface,
) -> Result<CacheAllocCaps> {
    match cache_backend(interface)? {
        CacheBackend::Hw => probes.hw_l3ca(cpu),
        CacheBackend::Os => probes.os_l3ca(cpu),
    }
}

/// Discover L2 cache allocation capabilities through `interface`.
pub(crate) fn discover_l2ca<P: CapProbes>(
    probes: &P,
    cpu: &CpuInfo,
    interface: Interface,
) -> Result<CacheAllocCaps> {
    match cache_backend(interface)? {
        CacheBackend::Hw => probes.hw_l2ca(cpu),
        CacheBackend::Os => probes.os_l2ca(cpu),
    }
}

/// Discover memory bandwidth allocation capabilities through
/// `interface`, branching on vendor for the MSR backend.
pub(crate) fn discover_mba<P: CapProbes>(
    probes: &P,
    cpu: &CpuInfo,
    interface: Interface,
) -> Result<MbaCaps> {
    match mba_backend(interface, cpu.vendor)? {
        MbaBackend::Hw => probes.hw_mba(cpu),
        MbaBackend::Amd => probes.amd_mba(cpu),
        MbaBackend::Os => probes.os_mba(cpu),
    }
}

/// Run all feature probes and assemble the capability snapshot.
///
/// Requires an already-resolved interface. A probe reporting
/// [`QosError::Resource`] means the feature is absent and is tolerated;
/// any other failure aborts discovery. An empty outcome is an error: a
/// platform with no resource control capabilities at all cannot be
/// initialized.
pub(crate) fn discover_capabilities<P: CapProbes>(
    probes: &P,
    cpu: &CpuInfo,
    interface: Interface,
) -> Result<Capabilities> {
    if !interface.is_concrete() {
        log::error!("capability discovery requires a concrete interface, got {interface}");
        return Err(QosError::Param(format!(
            "capability discovery requires a concrete interface, got {interface}"
        )));
    }

    let mon = tolerate_absent(discover_mon(probes, cpu, interface))?;
    let l3ca = tolerate_absent(discover_l3ca(probes, cpu, interface))?;
    let l2ca = tolerate_absent(discover_l2ca(probes, cpu, interface))?;
    let mut mba = tolerate_absent(discover_mba(probes, cpu, interface))?;

    // Controller (MBps) mode is an OS-interface concept; a discovered
    // MBA descriptor without a controller-mode determination is invalid.
    if interface.is_os() {
        if let Some(ref mut mba) = mba {
            let (supported, enabled) = probes.os_mba_ctrl(cpu).map_err(|e| {
                log::error!("MBA controller mode query failed: {e}");
                e
            })?;
            mba.ctrl = if supported {
                MbaController::Supported { enabled }
            } else {
                MbaController::Unsupported
            };
        }
    }

    let mut caps = Capabilities::default();
    if let Some(mon) = mon {
        caps.entries.push(Capability::Monitoring(mon));
    }
    if let Some(l3ca) = l3ca {
        caps.entries.push(Capability::L3Cat(l3ca));
    }
    if let Some(l2ca) = l2ca {
        caps.entries.push(Capability::L2Cat(l2ca));
    }
    if let Some(mba) = mba {
        caps.entries.push(Capability::Mba(mba));
    }

    if caps.is_empty() {
        log::error!("no resource control capabilities detected via {interface}");
        return Err(QosError::Failure(format!(
            "no resource control capabilities detected via {interface}"
        )));
    }
    Ok(caps)
}

/// Map a probe result into "present"/"absent"/fatal.
fn tolerate_absent<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(caps) => Ok(Some(caps)),
        Err(QosError::Resource(reason)) => {
            log::debug!("feature absent: {reason}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

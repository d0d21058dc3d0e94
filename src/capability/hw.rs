//! Hardware-register capability probes via CPUID enumeration.
//!
//! # Platform Support
//!
//! - **x86_64**: CPUID leaf 0x07 (RDT feature flags), leaf 0x10
//!   (allocation enumeration), leaf 0x0F (monitoring enumeration),
//!   leaf 0x80000020 (AMD bandwidth enumeration)
//! - **Other architectures**: every probe reports the feature absent
//!
//! Register layouts follow the vendor SDMs; decoding is split out into
//! pure functions so it can be tested with canned register values.

use crate::capability::{
    CacheAllocCaps, MbaCaps, MbaController, MonCaps, MonEventKind, MonitorEvent, PerfEvent,
};
use crate::error::{QosError, Result};
use crate::topology::CpuInfo;

const CPUID_LEAF_FEATURES: u32 = 0x7;
const CPUID_LEAF_RDT_MON: u32 = 0xF;
const CPUID_LEAF_RDT_ALLOC: u32 = 0x10;
const CPUID_LEAF_AMD_QOS: u32 = 0x8000_0020;

/// Raw CPUID output.
#[derive(Debug, Clone, Copy, Default)]
struct Regs {
    eax: u32,
    ebx: u32,
    ecx: u32,
    edx: u32,
}

#[cfg(target_arch = "x86_64")]
fn cpuid(leaf: u32, subleaf: u32) -> Option<Regs> {
    // Hypervisors and very old parts may not expose the leaf at all.
    let max_leaf = unsafe { core::arch::x86_64::__cpuid(leaf & 0x8000_0000) }.eax;
    if max_leaf < leaf {
        return None;
    }
    let r = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };
    Some(Regs {
        eax: r.eax,
        ebx: r.ebx,
        ecx: r.ecx,
        edx: r.edx,
    })
}

#[cfg(not(target_arch = "x86_64"))]
fn cpuid(_leaf: u32, _subleaf: u32) -> Option<Regs> {
    None
}

fn absent(what: &str) -> QosError {
    QosError::Resource(format!("{what} not detected via CPUID"))
}

/// Decode a CAT enumeration subleaf (0x10.1 for L3, 0x10.2 for L2).
fn decode_cache_alloc(regs: Regs, way_size: u32) -> CacheAllocCaps {
    CacheAllocCaps {
        num_classes: (regs.edx & 0xFFFF) + 1,
        num_ways: (regs.eax & 0x1F) + 1,
        way_size,
        way_contention: u64::from(regs.ebx),
        cdp: (regs.ecx >> 2) & 1 == 1,
        cdp_on: false,
        non_contiguous_cbm: (regs.ecx >> 3) & 1 == 1,
    }
}

/// Decode the MBA enumeration subleaf (0x10.3).
fn decode_mba(regs: Regs) -> MbaCaps {
    let throttle_max = (regs.eax & 0xFFF) + 1;
    let is_linear = (regs.ecx >> 2) & 1 == 1;
    MbaCaps {
        num_classes: (regs.edx & 0xFFFF) + 1,
        throttle_step: if is_linear { 100 - throttle_max } else { 0 },
        throttle_max,
        is_linear,
        ctrl: MbaController::Unknown,
    }
}

/// Decode the L3 monitoring subleaf (0xF.1) into the event list.
fn decode_mon(regs: Regs, max_rmid: u32) -> MonCaps {
    let scale_factor = if regs.ebx != 0 { Some(regs.ebx) } else { None };
    let l3_max_rmid = regs.ecx;
    let counter_length = 24 + (regs.eax & 0x7F);

    let mut events = Vec::new();
    let mut push = |kind| {
        events.push(MonitorEvent {
            kind,
            scale_factor,
            max_rmid: l3_max_rmid,
            counter_length,
        })
    };
    if regs.edx & 0x1 != 0 {
        push(MonEventKind::LlcOccupancy);
    }
    if regs.edx & 0x2 != 0 {
        push(MonEventKind::TotalMemBw);
    }
    if regs.edx & 0x4 != 0 {
        push(MonEventKind::LocalMemBw);
    }
    // Remote bandwidth is derived from total minus local.
    if regs.edx & 0x2 != 0 && regs.edx & 0x4 != 0 {
        push(MonEventKind::RemoteMemBw);
    }
    MonCaps { events, max_rmid }
}

/// Whether the RDT allocation feature flag (CPUID.0x7.0 EBX bit 15) is set.
fn rdt_alloc_supported() -> bool {
    cpuid(CPUID_LEAF_FEATURES, 0).is_some_and(|r| (r.ebx >> 15) & 1 == 1)
}

/// Whether the RDT monitoring feature flag (CPUID.0x7.0 EBX bit 12) is set.
fn rdt_mon_supported() -> bool {
    cpuid(CPUID_LEAF_FEATURES, 0).is_some_and(|r| (r.ebx >> 12) & 1 == 1)
}

/// Discover L3 CAT through CPUID.
pub(crate) fn l3ca_discover(cpu: &CpuInfo) -> Result<CacheAllocCaps> {
    if !rdt_alloc_supported() {
        return Err(absent("L3 CAT"));
    }
    let res_mask = cpuid(CPUID_LEAF_RDT_ALLOC, 0).ok_or_else(|| absent("L3 CAT"))?;
    if (res_mask.ebx >> 1) & 1 == 0 {
        return Err(absent("L3 CAT"));
    }
    let regs = cpuid(CPUID_LEAF_RDT_ALLOC, 1).ok_or_else(|| absent("L3 CAT"))?;
    log::debug!("L3 CAT detected via CPUID");
    Ok(decode_cache_alloc(regs, cpu.l3.way_size))
}

/// Discover L2 CAT through CPUID.
pub(crate) fn l2ca_discover(cpu: &CpuInfo) -> Result<CacheAllocCaps> {
    if !rdt_alloc_supported() {
        return Err(absent("L2 CAT"));
    }
    let res_mask = cpuid(CPUID_LEAF_RDT_ALLOC, 0).ok_or_else(|| absent("L2 CAT"))?;
    if (res_mask.ebx >> 2) & 1 == 0 {
        return Err(absent("L2 CAT"));
    }
    let regs = cpuid(CPUID_LEAF_RDT_ALLOC, 2).ok_or_else(|| absent("L2 CAT"))?;
    log::debug!("L2 CAT detected via CPUID");
    Ok(decode_cache_alloc(regs, cpu.l2.way_size))
}

/// Discover MBA through CPUID (Intel and other non-AMD vendors).
pub(crate) fn mba_discover(_cpu: &CpuInfo) -> Result<MbaCaps> {
    if !rdt_alloc_supported() {
        return Err(absent("MBA"));
    }
    let res_mask = cpuid(CPUID_LEAF_RDT_ALLOC, 0).ok_or_else(|| absent("MBA"))?;
    if (res_mask.ebx >> 3) & 1 == 0 {
        return Err(absent("MBA"));
    }
    let regs = cpuid(CPUID_LEAF_RDT_ALLOC, 3).ok_or_else(|| absent("MBA"))?;
    let caps = decode_mba(regs);
    if !caps.is_linear {
        log::info!("nonlinear MBA scale detected");
    }
    Ok(caps)
}

/// Discover AMD memory bandwidth enumeration (CPUID leaf 0x80000020).
pub(crate) fn amd_mba_discover(_cpu: &CpuInfo) -> Result<MbaCaps> {
    let res_mask = cpuid(CPUID_LEAF_AMD_QOS, 0).ok_or_else(|| absent("AMD MBA"))?;
    if (res_mask.ebx >> 1) & 1 == 0 {
        return Err(absent("AMD MBA"));
    }
    let regs = cpuid(CPUID_LEAF_AMD_QOS, 1).ok_or_else(|| absent("AMD MBA"))?;
    // AMD enumerates an absolute bandwidth limit rather than a delay
    // percentage; granularity is one unit and the scale is linear.
    Ok(MbaCaps {
        num_classes: (regs.edx & 0xFFFF) + 1,
        throttle_step: 1,
        throttle_max: (regs.eax & 0xFFF) + 1,
        is_linear: true,
        ctrl: MbaController::Unknown,
    })
}

/// Discover CMT/MBM monitoring through CPUID.
pub(crate) fn mon_discover(_cpu: &CpuInfo) -> Result<MonCaps> {
    if !rdt_mon_supported() {
        return Err(absent("monitoring"));
    }
    let root = cpuid(CPUID_LEAF_RDT_MON, 0).ok_or_else(|| absent("monitoring"))?;
    // EDX bit 1: L3 monitoring sub-resource present.
    if (root.edx >> 1) & 1 == 0 {
        return Err(absent("monitoring"));
    }
    let regs = cpuid(CPUID_LEAF_RDT_MON, 1).ok_or_else(|| absent("monitoring"))?;
    let mut caps = decode_mon(regs, root.ebx);
    if caps.events.is_empty() {
        return Err(absent("monitoring"));
    }
    append_perf_events(&mut caps);
    Ok(caps)
}

/// Perf-counter-derived events (IPC, LLC misses/references) ride along
/// whenever the kernel exposes perf.
fn append_perf_events(caps: &mut MonCaps) {
    if !std::path::Path::new("/proc/sys/kernel/perf_event_paranoid").exists() {
        return;
    }
    for event in [PerfEvent::Ipc, PerfEvent::LlcMisses, PerfEvent::LlcReferences] {
        caps.events.push(MonitorEvent {
            kind: MonEventKind::Perf(event),
            scale_factor: None,
            max_rmid: 0,
            counter_length: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cache_alloc() {
        // 12-way CBM (EAX=11), contention mask 0xC00, CDP bit set,
        // 16 classes (EDX=15).
        let regs = Regs {
            eax: 11,
            ebx: 0xC00,
            ecx: 1 << 2,
            edx: 15,
        };
        let caps = decode_cache_alloc(regs, 1024 * 1024);
        assert_eq!(caps.num_ways, 12);
        assert_eq!(caps.num_classes, 16);
        assert_eq!(caps.way_contention, 0xC00);
        assert!(caps.cdp);
        assert!(!caps.cdp_on);
        assert!(!caps.non_contiguous_cbm);
        assert_eq!(caps.way_size, 1024 * 1024);
    }

    #[test]
    fn test_decode_cache_alloc_non_contiguous() {
        let regs = Regs {
            eax: 15,
            ebx: 0,
            ecx: 1 << 3,
            edx: 7,
        };
        let caps = decode_cache_alloc(regs, 0);
        assert!(caps.non_contiguous_cbm);
        assert!(!caps.cdp);
        assert_eq!(caps.num_ways, 16);
        assert_eq!(caps.num_classes, 8);
    }

    #[test]
    fn test_decode_mba_linear() {
        // Max delay 90% (EAX=89), linear, 8 classes.
        let regs = Regs {
            eax: 89,
            ebx: 0,
            ecx: 1 << 2,
            edx: 7,
        };
        let caps = decode_mba(regs);
        assert_eq!(caps.num_classes, 8);
        assert_eq!(caps.throttle_max, 90);
        assert_eq!(caps.throttle_step, 10);
        assert!(caps.is_linear);
        assert_eq!(caps.ctrl, MbaController::Unknown);
    }

    #[test]
    fn test_decode_mba_nonlinear() {
        let regs = Regs {
            eax: 2047,
            ebx: 0,
            ecx: 0,
            edx: 15,
        };
        let caps = decode_mba(regs);
        assert!(!caps.is_linear);
        assert_eq!(caps.throttle_step, 0);
        assert_eq!(caps.throttle_max, 2048);
    }

    #[test]
    fn test_decode_mon_all_events() {
        // Occupancy + total + local BW supported, scale 32768,
        // 256 RMIDs (ECX=255), counter width 24+20.
        let regs = Regs {
            eax: 20,
            ebx: 32768,
            ecx: 255,
            edx: 0x7,
        };
        let caps = decode_mon(regs, 255);
        let kinds: Vec<_> = caps.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MonEventKind::LlcOccupancy,
                MonEventKind::TotalMemBw,
                MonEventKind::LocalMemBw,
                MonEventKind::RemoteMemBw,
            ]
        );
        for event in &caps.events {
            assert_eq!(event.scale_factor, Some(32768));
            assert_eq!(event.max_rmid, 255);
            assert_eq!(event.counter_length, 44);
        }
    }

    #[test]
    fn test_decode_mon_occupancy_only() {
        let regs = Regs {
            eax: 0,
            ebx: 0,
            ecx: 63,
            edx: 0x1,
        };
        let caps = decode_mon(regs, 63);
        assert_eq!(caps.events.len(), 1);
        assert_eq!(caps.events[0].kind, MonEventKind::LlcOccupancy);
        assert_eq!(caps.events[0].scale_factor, None);
        assert_eq!(caps.events[0].counter_length, 24);
    }

    #[test]
    fn test_decode_mon_no_remote_without_both_bw() {
        // Total BW only: no derived remote event.
        let regs = Regs {
            eax: 0,
            ebx: 1,
            ecx: 0,
            edx: 0x3,
        };
        let caps = decode_mon(regs, 0);
        let kinds: Vec<_> = caps.events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&MonEventKind::TotalMemBw));
        assert!(!kinds.contains(&MonEventKind::RemoteMemBw));
    }
}

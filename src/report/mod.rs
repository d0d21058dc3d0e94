//! Human-readable rendering of a discovered capability snapshot.

use std::fmt::Write;

use crate::capability::{Capabilities, CacheAllocCaps, MonEventKind, PerfEvent};
use crate::interface::Interface;
use crate::topology::CpuInfo;

fn size_kb(bytes: u32) -> u32 {
    bytes / 1024
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn event_name(kind: MonEventKind) -> &'static str {
    match kind {
        MonEventKind::LlcOccupancy => "LLC occupancy",
        MonEventKind::LocalMemBw => "Local memory bandwidth",
        MonEventKind::TotalMemBw => "Total memory bandwidth",
        MonEventKind::RemoteMemBw => "Remote memory bandwidth",
        MonEventKind::Perf(PerfEvent::LlcMisses) => "LLC misses (perf)",
        MonEventKind::Perf(PerfEvent::LlcReferences) => "LLC references (perf)",
        MonEventKind::Perf(PerfEvent::Ipc) => "Instructions/cycle (perf)",
    }
}

fn render_cache_alloc(out: &mut String, label: &str, caps: &CacheAllocCaps, verbose: bool) {
    let mut line = format!(
        "    {label}: {} classes, {} ways ({} KB/way)",
        caps.num_classes,
        caps.num_ways,
        size_kb(caps.way_size)
    );
    if caps.cdp {
        let _ = write!(line, ", CDP {}", on_off(caps.cdp_on));
    }
    out.push_str(&line);
    out.push('\n');
    if verbose {
        let _ = writeln!(
            out,
            "        way contention bitmask: {:#x}",
            caps.way_contention
        );
        let _ = writeln!(
            out,
            "        non-contiguous bitmasks: {}",
            if caps.non_contiguous_cbm {
                "supported"
            } else {
                "not supported"
            }
        );
    }
}

/// Render the capability snapshot as a multi-line report.
///
/// `verbose` adds per-feature detail that the summary omits, e.g. way
/// contention masks and per-event RMID limits.
pub fn render(
    caps: &Capabilities,
    cpu: &CpuInfo,
    interface: Interface,
    verbose: bool,
) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "RDT capabilities ({} interface, {} vendor, {} cores)",
        interface, cpu.vendor, cpu.num_cores
    );
    if cpu.l3.detected {
        let _ = writeln!(
            out,
            "    L3 cache: {} KB total, {} ways",
            size_kb(cpu.l3.total_size),
            cpu.l3.num_ways
        );
    }
    if cpu.l2.detected {
        let _ = writeln!(
            out,
            "    L2 cache: {} KB total, {} ways",
            size_kb(cpu.l2.total_size),
            cpu.l2.num_ways
        );
    }

    let _ = writeln!(out, "Allocation:");
    match (caps.l3cat(), caps.l2cat(), caps.mba()) {
        (None, None, None) => {
            let _ = writeln!(out, "    none supported");
        }
        (l3, l2, mba) => {
            if let Some(l3) = l3 {
                render_cache_alloc(&mut out, "L3 CAT", l3, verbose);
            }
            if let Some(l2) = l2 {
                render_cache_alloc(&mut out, "L2 CAT", l2, verbose);
            }
            if let Some(mba) = mba {
                let _ = writeln!(
                    out,
                    "    MBA: {} classes, {}% granularity, {}% max, {}",
                    mba.num_classes,
                    mba.throttle_step,
                    mba.throttle_max,
                    if mba.is_linear {
                        "linear"
                    } else {
                        "non-linear"
                    }
                );
                if verbose {
                    let _ = writeln!(out, "        controller mode: {}", mba.ctrl);
                }
            }
        }
    }

    let _ = writeln!(out, "Monitoring:");
    match caps.monitoring() {
        None => {
            let _ = writeln!(out, "    none supported");
        }
        Some(mon) => {
            let _ = writeln!(out, "    max RMID: {}", mon.max_rmid);
            for event in &mon.events {
                if verbose {
                    let _ = writeln!(
                        out,
                        "    {} (max RMID {}, {}-bit counter)",
                        event_name(event.kind),
                        event.max_rmid,
                        event.counter_length
                    );
                } else {
                    let _ = writeln!(out, "    {}", event_name(event.kind));
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        Capability, MbaCaps, MbaController, MonCaps, MonitorEvent,
    };
    use crate::topology::{CacheInfo, Vendor};

    fn sample_cpu() -> CpuInfo {
        CpuInfo {
            vendor: Vendor::Intel,
            num_cores: 8,
            max_core_id: 7,
            l2: CacheInfo::from_geometry(8, 1024, 1, 64),
            l3: CacheInfo::from_geometry(12, 16384, 1, 64),
        }
    }

    fn sample_caps() -> Capabilities {
        let mut caps = Capabilities::default();
        caps.push_for_test(Capability::Monitoring(MonCaps {
            events: vec![MonitorEvent {
                kind: MonEventKind::LlcOccupancy,
                scale_factor: Some(65536),
                max_rmid: 255,
                counter_length: 24,
            }],
            max_rmid: 255,
        }));
        caps.push_for_test(Capability::L3Cat(CacheAllocCaps {
            num_classes: 16,
            num_ways: 12,
            way_size: 1024 * 1024,
            way_contention: 0xc00,
            cdp: true,
            cdp_on: false,
            non_contiguous_cbm: false,
        }));
        caps.push_for_test(Capability::Mba(MbaCaps {
            num_classes: 8,
            throttle_step: 10,
            throttle_max: 90,
            is_linear: true,
            ctrl: MbaController::Unsupported,
        }));
        caps
    }

    #[test]
    fn test_render_summary() {
        let text = render(&sample_caps(), &sample_cpu(), Interface::Msr, false);
        assert!(text.contains("MSR interface"));
        assert!(text.contains("L3 CAT: 16 classes, 12 ways (1024 KB/way), CDP off"));
        assert!(text.contains("MBA: 8 classes, 10% granularity, 90% max, linear"));
        assert!(text.contains("LLC occupancy"));
        assert!(!text.contains("way contention"));
    }

    #[test]
    fn test_render_verbose_detail() {
        let text = render(&sample_caps(), &sample_cpu(), Interface::Os, true);
        assert!(text.contains("way contention bitmask: 0xc00"));
        assert!(text.contains("(max RMID 255, 24-bit counter)"));
    }

    #[test]
    fn test_render_empty_sections() {
        let caps = Capabilities::default();
        let text = render(&caps, &sample_cpu(), Interface::Msr, false);
        assert!(text.contains("Allocation:\n    none supported"));
        assert!(text.contains("Monitoring:\n    none supported"));
    }
}

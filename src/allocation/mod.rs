//! Allocation subsystem bring-up.
//!
//! Configuring classes of service happens after capability discovery;
//! this module only validates and records what discovery handed over.

use crate::capability::Capabilities;
use crate::config::Config;
use crate::error::Result;
use crate::topology::CpuInfo;

/// Initialize the allocation subsystem from the discovered snapshot.
pub(crate) fn init(cpu: &CpuInfo, caps: &Capabilities, _cfg: &Config) -> Result<()> {
    let l3 = caps.l3cat().map(|c| c.num_classes).unwrap_or(0);
    let l2 = caps.l2cat().map(|c| c.num_classes).unwrap_or(0);
    let mba = caps.mba().map(|c| c.num_classes).unwrap_or(0);
    if l3 == 0 && l2 == 0 && mba == 0 {
        log::info!("no allocation capabilities present; allocation API inactive");
        return Ok(());
    }
    log::info!(
        "allocation ready on {} cores: L3 COS {l3}, L2 COS {l2}, MBA COS {mba}",
        cpu.num_cores
    );
    Ok(())
}

/// Tear down the allocation subsystem.
pub(crate) fn fini() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_without_alloc_caps() {
        let cpu = CpuInfo::detect().unwrap();
        init(&cpu, &Capabilities::default(), &Config::default()).unwrap();
        fini().unwrap();
    }
}

//! Monitoring subsystem bring-up.
//!
//! Event reading and RMID association happen after capability
//! discovery; this module only validates and records the monitoring
//! descriptor.

use crate::capability::Capabilities;
use crate::config::Config;
use crate::error::Result;
use crate::topology::CpuInfo;

/// Initialize the monitoring subsystem from the discovered snapshot.
pub(crate) fn init(cpu: &CpuInfo, caps: &Capabilities, _cfg: &Config) -> Result<()> {
    match caps.monitoring() {
        Some(mon) => {
            log::info!(
                "monitoring ready on {} cores: {} events, max RMID {}",
                cpu.num_cores,
                mon.events.len(),
                mon.max_rmid
            );
        }
        None => {
            log::info!("no monitoring capabilities present; monitoring API inactive");
        }
    }
    Ok(())
}

/// Tear down the monitoring subsystem.
pub(crate) fn fini() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_without_mon_caps() {
        let cpu = CpuInfo::detect().unwrap();
        init(&cpu, &Capabilities::default(), &Config::default()).unwrap();
        fini().unwrap();
    }
}

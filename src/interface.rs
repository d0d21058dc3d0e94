//! Backend interface selection — MSR registers versus the OS resctrl
//! filesystem.
//!
//! Every feature family can be reached through one of two mutually
//! exclusive low-level backends: direct MSR access, or the kernel's
//! resctrl filesystem. The requested interface ("AUTO" included) is
//! resolved to one concrete backend before any capability probing
//! happens, honoring the `RDT_IFACE` environment override and the
//! platform gate (resctrl only exists on Linux).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::os;
use crate::error::{QosError, Result};

/// Environment variable forcing an interface family.
///
/// Recognized values are `MSR` and `OS`; any other non-empty value is an
/// explicit, unsupported override and fails every resolution.
pub const IFACE_ENV: &str = "RDT_IFACE";

/// Low-level backend interface selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interface {
    /// Direct hardware register (MSR) access.
    Msr,
    /// OS resctrl filesystem.
    Os,
    /// OS resctrl filesystem, monitoring only.
    OsResctrlMon,
    /// Pick automatically; never valid past resolution.
    Auto,
}

impl Interface {
    /// Decode a raw selector value, e.g. from a foreign ABI or an
    /// untyped configuration source.
    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Msr),
            1 => Ok(Self::Os),
            2 => Ok(Self::OsResctrlMon),
            3 => Ok(Self::Auto),
            other => {
                log::error!("invalid interface selector {other}");
                Err(QosError::Param(format!(
                    "invalid interface selector {other}"
                )))
            }
        }
    }

    /// Whether this selector names a concrete backend.
    pub fn is_concrete(self) -> bool {
        self != Self::Auto
    }

    /// Whether this selector names the resctrl filesystem family.
    pub fn is_os(self) -> bool {
        matches!(self, Self::Os | Self::OsResctrlMon)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Msr => write!(f, "MSR"),
            Self::Os => write!(f, "OS"),
            Self::OsResctrlMon => write!(f, "OS_RESCTRL_MON"),
            Self::Auto => write!(f, "AUTO"),
        }
    }
}

/// Resolve a requested interface to a concrete backend.
///
/// Consults the `RDT_IFACE` override and, for `AUTO` with no override,
/// probes whether the running kernel actually exposes resctrl. The
/// returned interface is never [`Interface::Auto`].
pub fn resolve(requested: Interface) -> Result<Interface> {
    let resctrl_platform = cfg!(target_os = "linux");

    // The platform gate rejects resctrl requests before any environment
    // lookup happens.
    if !resctrl_platform && requested.is_os() {
        log::error!("{requested} interface not supported on this platform");
        return Err(QosError::Param(format!(
            "{requested} interface not supported on this platform"
        )));
    }

    let forced = std::env::var(IFACE_ENV).ok().filter(|v| !v.is_empty());
    resolve_with(
        requested,
        forced.as_deref(),
        resctrl_platform,
        os::resctrl_is_supported,
    )
}

/// Resolution decision table, separated from the environment and the
/// kernel probe so it can be exercised exhaustively.
fn resolve_with<F>(
    requested: Interface,
    forced: Option<&str>,
    resctrl_platform: bool,
    resctrl_available: F,
) -> Result<Interface>
where
    F: FnOnce() -> bool,
{
    use Interface::*;

    if !resctrl_platform && requested.is_os() {
        log::error!("{requested} interface not supported on this platform");
        return Err(QosError::Param(format!(
            "{requested} interface not supported on this platform"
        )));
    }

    match forced {
        Some("MSR") => match requested {
            Msr | Auto => Ok(Msr),
            Os | OsResctrlMon => {
                log::error!("{IFACE_ENV}=MSR conflicts with requested {requested} interface");
                Err(QosError::Failure(format!(
                    "{IFACE_ENV}=MSR conflicts with requested {requested} interface"
                )))
            }
        },
        Some("OS") => {
            if !resctrl_platform {
                log::error!("{IFACE_ENV}=OS is not supported on this platform");
                return Err(QosError::Failure(format!(
                    "{IFACE_ENV}=OS is not supported on this platform"
                )));
            }
            match requested {
                Os => Ok(Os),
                OsResctrlMon => Ok(OsResctrlMon),
                Auto => Ok(Os),
                Msr => {
                    log::error!("{IFACE_ENV}=OS conflicts with requested MSR interface");
                    Err(QosError::Failure(format!(
                        "{IFACE_ENV}=OS conflicts with requested MSR interface"
                    )))
                }
            }
        }
        Some(other) => {
            log::error!("unrecognized {IFACE_ENV} value \"{other}\"");
            Err(QosError::Failure(format!(
                "unrecognized {IFACE_ENV} value \"{other}\""
            )))
        }
        None => match requested {
            Msr => Ok(Msr),
            Os => Ok(Os),
            OsResctrlMon => Ok(OsResctrlMon),
            Auto => {
                if resctrl_platform && resctrl_available() {
                    Ok(Os)
                } else {
                    Ok(Msr)
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Interface::*;

    // Availability probe that must not run. Used anywhere resolution is
    // required to decide without touching the kernel.
    fn no_probe() -> bool {
        panic!("resctrl availability must not be probed here");
    }

    #[test]
    fn test_interface_display() {
        assert_eq!(Msr.to_string(), "MSR");
        assert_eq!(Os.to_string(), "OS");
        assert_eq!(OsResctrlMon.to_string(), "OS_RESCTRL_MON");
        assert_eq!(Auto.to_string(), "AUTO");
    }

    #[test]
    fn test_interface_serde_round_trip() {
        for iface in [Msr, Os, OsResctrlMon, Auto] {
            let json = serde_json::to_string(&iface).unwrap();
            let back: Interface = serde_json::from_str(&json).unwrap();
            assert_eq!(back, iface);
        }
    }

    #[test]
    fn test_from_raw_valid() {
        assert_eq!(Interface::from_raw(0).unwrap(), Msr);
        assert_eq!(Interface::from_raw(1).unwrap(), Os);
        assert_eq!(Interface::from_raw(2).unwrap(), OsResctrlMon);
        assert_eq!(Interface::from_raw(3).unwrap(), Auto);
    }

    #[test]
    fn test_from_raw_out_of_range_is_param() {
        for raw in [4u32, 5, 100, u32::MAX] {
            let err = Interface::from_raw(raw).unwrap_err();
            assert!(err.is_param(), "selector {raw} must be a parameter error");
        }
    }

    #[test]
    fn test_resolve_concrete_no_override() {
        assert_eq!(
            resolve_with(Msr, None, true, no_probe).unwrap(),
            Msr
        );
        assert_eq!(resolve_with(Os, None, true, no_probe).unwrap(), Os);
        assert_eq!(
            resolve_with(OsResctrlMon, None, true, no_probe).unwrap(),
            OsResctrlMon
        );
    }

    #[test]
    fn test_resolve_auto_probes_kernel() {
        assert_eq!(resolve_with(Auto, None, true, || true).unwrap(), Os);
        assert_eq!(resolve_with(Auto, None, true, || false).unwrap(), Msr);
    }

    #[test]
    fn test_resolve_platform_gate() {
        // Without resctrl on the platform, OS requests are parameter
        // errors no matter what the environment says, and AUTO picks MSR
        // without probing.
        for forced in [None, Some("MSR"), Some("OS"), Some("garbage")] {
            assert!(resolve_with(Os, forced, false, no_probe)
                .unwrap_err()
                .is_param());
            assert!(resolve_with(OsResctrlMon, forced, false, no_probe)
                .unwrap_err()
                .is_param());
        }
        assert_eq!(resolve_with(Auto, None, false, no_probe).unwrap(), Msr);
        assert_eq!(resolve_with(Msr, None, false, no_probe).unwrap(), Msr);
    }

    #[test]
    fn test_resolve_override_msr() {
        let forced = Some("MSR");
        assert_eq!(resolve_with(Msr, forced, true, no_probe).unwrap(), Msr);
        assert_eq!(resolve_with(Auto, forced, true, no_probe).unwrap(), Msr);

        let err = resolve_with(Os, forced, true, no_probe).unwrap_err();
        assert!(!err.is_param());
        let err = resolve_with(OsResctrlMon, forced, true, no_probe).unwrap_err();
        assert!(!err.is_param());
    }

    #[test]
    fn test_resolve_override_os() {
        let forced = Some("OS");
        assert_eq!(resolve_with(Os, forced, true, no_probe).unwrap(), Os);
        assert_eq!(
            resolve_with(OsResctrlMon, forced, true, no_probe).unwrap(),
            OsResctrlMon
        );
        assert_eq!(resolve_with(Auto, forced, true, no_probe).unwrap(), Os);

        let err = resolve_with(Msr, forced, true, no_probe).unwrap_err();
        assert!(!err.is_param());
    }

    #[test]
    fn test_resolve_override_unrecognized() {
        // An override to an unsupported family invalidates resolution
        // unconditionally, AUTO included.
        for requested in [Msr, Os, OsResctrlMon, Auto] {
            let err = resolve_with(requested, Some("UNSUPPORTED"), true, no_probe).unwrap_err();
            assert!(!err.is_param());
            assert!(!err.is_resource());
        }
    }

    #[test]
    fn test_resolve_override_request_table() {
        // Exhaustive override-family x request compatibility table.
        let cases: [(&str, Interface, Option<Interface>); 8] = [
            ("MSR", Msr, Some(Msr)),
            ("MSR", Os, None),
            ("MSR", OsResctrlMon, None),
            ("MSR", Auto, Some(Msr)),
            ("OS", Msr, None),
            ("OS", Os, Some(Os)),
            ("OS", OsResctrlMon, Some(OsResctrlMon)),
            ("OS", Auto, Some(Os)),
        ];
        for (forced, requested, expected) in cases {
            let got = resolve_with(requested, Some(forced), true, no_probe);
            match expected {
                Some(iface) => assert_eq!(got.unwrap(), iface, "{forced}/{requested}"),
                None => {
                    let err = got.unwrap_err();
                    assert!(!err.is_param(), "{forced}/{requested} must be a conflict");
                }
            }
        }
    }
}

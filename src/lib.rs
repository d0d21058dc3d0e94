//! `rdtctl` — Intel RDT / AMD QoS capability discovery and library
//! lifecycle management.
//!
//! The crate resolves which platform backend to use (direct MSR access
//! or the Linux resctrl filesystem), probes which resource-director
//! features the machine supports (L3/L2 cache allocation, memory
//! bandwidth allocation, cache and bandwidth monitoring) and manages
//! the process-wide initialized/uninitialized state of the library.
//!
//! # Platform Support
//!
//! - **Linux**: MSR backend via CPUID and `/dev/cpu/*/msr`; OS backend
//!   via the `resctrl` filesystem
//! - **Other Unix**: MSR backend only
//!
//! # Examples
//!
//! ```no_run
//! use rdtctl::{Config, Qos};
//!
//! let qos = Qos::init(&Config::default()).unwrap();
//! let caps = qos.capabilities().unwrap();
//! if let Some(l3) = caps.l3cat() {
//!     println!("L3 CAT: {} classes of service", l3.num_classes);
//! }
//! qos.finalize().unwrap();
//! ```

mod allocation;
pub mod capability;
pub mod config;
pub mod error;
pub mod interface;
mod lifecycle;
mod lock;
mod logger;
mod machine;
mod monitoring;
pub mod report;
pub mod topology;

pub use capability::{
    Capabilities, Capability, CacheAllocCaps, MbaCaps, MbaController, MonCaps, MonEventKind,
    MonitorEvent, PerfEvent,
};
pub use config::Config;
pub use error::{QosError, Result};
pub use interface::Interface;
pub use lifecycle::Qos;
pub use logger::{LogSink, Verbosity};
pub use topology::{CacheInfo, CpuInfo, Vendor};

//! Library lifecycle — process-wide init/finalize sequencing.
//!
//! The library is a process-wide singleton with two states,
//! uninitialized and initialized. `init` resolves the backend
//! interface, discovers capabilities and brings up the dependent
//! subsystems in fixed order; `finalize` tears them down best-effort in
//! reverse order. Both transitions hold the cross-process lock and the
//! in-process mutex, acquired in that order and released in reverse on
//! every exit path.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::capability::{self, Capabilities, PlatformProbes};
use crate::config::Config;
use crate::error::{QosError, Result};
use crate::interface::{self, Interface};
use crate::lock::{ProcessLock, LOCKFILE};
use crate::topology::CpuInfo;
use crate::{allocation, logger, machine, monitoring};

/// Consumed subsystem seams, one init/fini pair each, in the order the
/// lifecycle drives them.
pub(crate) trait Subsystems {
    fn log_start(&self, cfg: &Config) -> Result<()>;
    fn log_stop(&self) -> Result<()>;
    fn resolve_interface(&self, requested: Interface) -> Result<Interface>;
    fn cpuinfo_init(&self, interface: Interface) -> Result<CpuInfo>;
    fn cpuinfo_fini(&self) -> Result<()>;
    fn machine_init(&self, cpu: &CpuInfo, interface: Interface) -> Result<()>;
    fn machine_fini(&self) -> Result<()>;
    fn discover(&self, cpu: &CpuInfo, interface: Interface) -> Result<Capabilities>;
    fn alloc_init(&self, cpu: &CpuInfo, caps: &Capabilities, cfg: &Config) -> Result<()>;
    fn alloc_fini(&self) -> Result<()>;
    fn mon_init(&self, cpu: &CpuInfo, caps: &Capabilities, cfg: &Config) -> Result<()>;
    fn mon_fini(&self) -> Result<()>;
}

/// Production subsystems wired to the real modules.
pub(crate) struct Platform;

impl Subsystems for Platform {
    fn log_start(&self, cfg: &Config) -> Result<()> {
        logger::start(&cfg.log_sink, cfg.verbosity)
    }
    fn log_stop(&self) -> Result<()> {
        logger::stop()
    }
    fn resolve_interface(&self, requested: Interface) -> Result<Interface> {
        interface::resolve(requested)
    }
    fn cpuinfo_init(&self, _interface: Interface) -> Result<CpuInfo> {
        CpuInfo::detect()
    }
    fn cpuinfo_fini(&self) -> Result<()> {
        Ok(())
    }
    fn machine_init(&self, cpu: &CpuInfo, interface: Interface) -> Result<()> {
        machine::init(cpu.max_core_id, interface)
    }
    fn machine_fini(&self) -> Result<()> {
        machine::fini()
    }
    fn discover(&self, cpu: &CpuInfo, interface: Interface) -> Result<Capabilities> {
        capability::discover_capabilities(&PlatformProbes, cpu, interface)
    }
    fn alloc_init(&self, cpu: &CpuInfo, caps: &Capabilities, cfg: &Config) -> Result<()> {
        allocation::init(cpu, caps, cfg)
    }
    fn alloc_fini(&self) -> Result<()> {
        allocation::fini()
    }
    fn mon_init(&self, cpu: &CpuInfo, caps: &Capabilities, cfg: &Config) -> Result<()> {
        monitoring::init(cpu, caps, cfg)
    }
    fn mon_fini(&self) -> Result<()> {
        monitoring::fini()
    }
}

/// State stored for the initialized lifetime of the library.
pub(crate) struct Session {
    pub interface: Interface,
    pub capabilities: Capabilities,
    pub topology: CpuInfo,
}

/// The lifecycle state machine. The mutex doubles as the in-process
/// serialization primitive and the initialized flag (`Some` session).
pub(crate) struct Lifecycle<S> {
    subsystems: S,
    lock_path: PathBuf,
    state: Mutex<Option<Session>>,
}

impl<S: Subsystems> Lifecycle<S> {
    pub(crate) fn new(subsystems: S, lock_path: PathBuf) -> Self {
        Self {
            subsystems,
            lock_path,
            state: Mutex::new(None),
        }
    }

    /// Transition uninitialized -> initialized.
    pub(crate) fn init(&self, cfg: &Config) -> Result<()> {
        // Cross-process lock first, in-process mutex second; guards drop
        // in reverse order on every path out of this function.
        let _plock = ProcessLock::acquire(&self.lock_path)?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| QosError::Failure("lifecycle mutex poisoned".to_string()))?;

        if state.is_some() {
            log::error!("init called on an already initialized library");
            return Err(QosError::AlreadyInitialized);
        }

        self.subsystems.log_start(cfg)?;
        match self.bring_up(cfg) {
            Ok(session) => {
                log::info!("library initialized via {} interface", session.interface);
                *state = Some(session);
                Ok(())
            }
            Err(e) => {
                let _ = self.subsystems.log_stop();
                Err(e)
            }
        }
    }

    /// Bring up the dependent subsystems in fixed order, tearing down
    /// everything this call already brought up when a step fails.
    fn bring_up(&self, cfg: &Config) -> Result<Session> {
        let interface = self.subsystems.resolve_interface(cfg.interface)?;

        let topology = self.subsystems.cpuinfo_init(interface)?;

        if let Err(e) = self.subsystems.machine_init(&topology, interface) {
            let _ = self.subsystems.cpuinfo_fini();
            return Err(e);
        }

        let capabilities = match self.subsystems.discover(&topology, interface) {
            Ok(caps) => caps,
            Err(e) => {
                let _ = self.subsystems.machine_fini();
                let _ = self.subsystems.cpuinfo_fini();
                return Err(e);
            }
        };

        if let Err(e) = self.subsystems.alloc_init(&topology, &capabilities, cfg) {
            let _ = self.subsystems.machine_fini();
            let _ = self.subsystems.cpuinfo_fini();
            return Err(e);
        }

        if let Err(e) = self.subsystems.mon_init(&topology, &capabilities, cfg) {
            let _ = self.subsystems.alloc_fini();
            let _ = self.subsystems.machine_fini();
            let _ = self.subsystems.cpuinfo_fini();
            return Err(e);
        }

        Ok(Session {
            interface,
            capabilities,
            topology,
        })
    }

    /// Transition initialized -> uninitialized.
    ///
    /// Teardown is best-effort: every subsystem's fini runs even when an
    /// earlier one failed, and the state resets regardless; the first
    /// failure is reported after all steps were attempted.
    pub(crate) fn finalize(&self) -> Result<()> {
        let _plock = ProcessLock::acquire(&self.lock_path)?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| QosError::Failure("lifecycle mutex poisoned".to_string()))?;

        if state.take().is_none() {
            log::error!("finalize called on an uninitialized library");
            return Err(QosError::NotInitialized);
        }

        // The array literal evaluates every teardown before inspection.
        let results = [
            ("monitoring", self.subsystems.mon_fini()),
            ("allocation", self.subsystems.alloc_fini()),
            ("machine", self.subsystems.machine_fini()),
            ("topology", self.subsystems.cpuinfo_fini()),
            ("logging", self.subsystems.log_stop()),
        ];

        let mut first = None;
        for (name, result) in results {
            if let Err(e) = result {
                log::error!("{name} teardown failed: {e}");
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
        match first {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Run `f` against the stored session; [`QosError::NotInitialized`]
    /// outside the initialized state.
    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Result<T> {
        let state = self
            .state
            .lock()
            .map_err(|_| QosError::Failure("lifecycle mutex poisoned".to_string()))?;
        match state.as_ref() {
            Some(session) => Ok(f(session)),
            None => Err(QosError::NotInitialized),
        }
    }
}

static LIFECYCLE: OnceLock<Lifecycle<Platform>> = OnceLock::new();

fn global() -> &'static Lifecycle<Platform> {
    LIFECYCLE.get_or_init(|| Lifecycle::new(Platform, PathBuf::from(LOCKFILE)))
}

/// Handle over the initialized library.
///
/// Created by [`Qos::init`]; the process-wide state stays initialized
/// until [`Qos::finalize`] is called. Dropping the handle without
/// finalizing leaves the library initialized.
pub struct Qos {
    _priv: (),
}

impl Qos {
    /// Initialize the library. Fails with
    /// [`QosError::AlreadyInitialized`] when called twice without an
    /// intervening finalize.
    pub fn init(cfg: &Config) -> Result<Self> {
        global().init(cfg)?;
        Ok(Self { _priv: () })
    }

    /// Finalize the library, tearing down all subsystems.
    pub fn finalize(self) -> Result<()> {
        global().finalize()
    }

    /// The capability snapshot discovered at init time.
    pub fn capabilities(&self) -> Result<Capabilities> {
        global().with_session(|s| s.capabilities.clone())
    }

    /// The concrete interface resolved at init time.
    pub fn interface(&self) -> Result<Interface> {
        global().with_session(|s| s.interface)
    }

    /// The CPU topology enumerated at init time.
    pub fn topology(&self) -> Result<CpuInfo> {
        global().with_session(|s| s.topology.clone())
    }
}

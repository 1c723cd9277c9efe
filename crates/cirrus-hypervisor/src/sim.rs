//! In-memory simulated backend.
//!
//! `SimHypervisor` implements the full [`Hypervisor`] contract against an
//! in-memory machine table. CPU-time counters accrue in real time from a
//! per-machine busy fraction, so utilization sampled over a wall-clock
//! window comes out at roughly `busy * 100` percent. Used by the test
//! suites and by `cirrusd run --backend sim`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::{HypervisorError, HypervisorResult};
use crate::machine::MachineConfig;
use crate::Hypervisor;

struct SimMachine {
    config: MachineConfig,
    running: bool,
    /// Fraction of each vCPU kept busy while running (may exceed 1.0 to
    /// model bursts).
    busy: f64,
    /// CPU time accrued before the last rebase.
    base_cpu_ns: u64,
    /// When the current accrual window started.
    since: Instant,
}

impl SimMachine {
    fn new(config: MachineConfig, running: bool) -> Self {
        Self {
            config,
            running,
            busy: 0.0,
            base_cpu_ns: 0,
            since: Instant::now(),
        }
    }

    fn cpu_time_ns(&self) -> u64 {
        if !self.running {
            return self.base_cpu_ns;
        }
        let burned =
            self.since.elapsed().as_secs_f64() * self.busy * f64::from(self.config.vcpus) * 1e9;
        self.base_cpu_ns + burned as u64
    }

    /// Fold accrued time into the base so `busy` can change mid-run.
    fn rebase(&mut self) {
        self.base_cpu_ns = self.cpu_time_ns();
        self.since = Instant::now();
    }
}

/// Simulated virtualization backend.
#[derive(Default)]
pub struct SimHypervisor {
    machines: Mutex<HashMap<String, SimMachine>>,
    severed: AtomicBool,
    fail_define: AtomicBool,
}

impl SimHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a machine to the backend in the running state.
    pub fn add_machine(&self, config: MachineConfig) {
        let mut machines = self.lock();
        machines.insert(config.name.clone(), SimMachine::new(config, true));
    }

    /// Set the busy fraction for a running machine.
    pub fn set_busy(&self, name: &str, busy: f64) {
        let mut machines = self.lock();
        if let Some(m) = machines.get_mut(name) {
            m.rebase();
            m.busy = busy;
        }
    }

    /// Simulate losing the connection; every subsequent call fails with
    /// `ConnectionLost`.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    /// Make subsequent `define` calls fail, for exercising partial-failure
    /// paths.
    pub fn set_define_error(&self, fail: bool) {
        self.fail_define.store(fail, Ordering::SeqCst);
    }

    /// Whether the named machine is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        self.lock().get(name).map(|m| m.running).unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SimMachine>> {
        self.machines.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_connection(&self) -> HypervisorResult<()> {
        if self.severed.load(Ordering::SeqCst) {
            return Err(HypervisorError::ConnectionLost(
                "simulated connection severed".to_string(),
            ));
        }
        Ok(())
    }

    fn with_machine<T>(
        &self,
        name: &str,
        f: impl FnOnce(&SimMachine) -> T,
    ) -> HypervisorResult<T> {
        self.check_connection()?;
        let machines = self.lock();
        machines
            .get(name)
            .map(f)
            .ok_or_else(|| HypervisorError::InstanceNotFound(name.to_string()))
    }
}

impl Hypervisor for SimHypervisor {
    fn list_names(&self) -> HypervisorResult<Vec<String>> {
        self.check_connection()?;
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn cpu_time_ns(&self, name: &str) -> HypervisorResult<u64> {
        self.with_machine(name, |m| m.cpu_time_ns())
    }

    fn vcpu_count(&self, name: &str) -> HypervisorResult<u32> {
        self.with_machine(name, |m| m.config.vcpus)
    }

    fn config_descriptor(&self, name: &str) -> HypervisorResult<String> {
        self.with_machine(name, |m| m.config.clone())?.to_toml()
    }

    fn identity(&self, name: &str) -> HypervisorResult<String> {
        self.with_machine(name, |m| m.config.uuid.clone())
    }

    fn define(&self, descriptor: &str) -> HypervisorResult<String> {
        self.check_connection()?;
        if self.fail_define.load(Ordering::SeqCst) {
            return Err(HypervisorError::OperationFailed {
                name: "<define>".to_string(),
                reason: "simulated define failure".to_string(),
            });
        }

        let config = MachineConfig::from_toml(descriptor)?;
        let mut machines = self.lock();
        if machines.contains_key(&config.name) {
            return Err(HypervisorError::OperationFailed {
                name: config.name,
                reason: "machine already defined".to_string(),
            });
        }
        let name = config.name.clone();
        machines.insert(name.clone(), SimMachine::new(config, false));
        Ok(name)
    }

    fn start(&self, name: &str) -> HypervisorResult<()> {
        self.check_connection()?;
        let mut machines = self.lock();
        let machine = machines
            .get_mut(name)
            .ok_or_else(|| HypervisorError::InstanceNotFound(name.to_string()))?;
        machine.rebase();
        machine.running = true;
        Ok(())
    }
}

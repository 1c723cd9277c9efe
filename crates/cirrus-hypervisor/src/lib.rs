//! cirrus-hypervisor — the virtualization capability interface.
//!
//! Everything the autoscaler needs from a virtualization layer is expressed
//! through the [`Hypervisor`] trait: name lookup, cumulative CPU-time and
//! vCPU counters, machine descriptors, and define/start lifecycle calls.
//! Any backend exposing these operations (libvirt, a cloud API, the bundled
//! [`SimHypervisor`]) satisfies the contract.
//!
//! Machine descriptors are typed [`MachineConfig`] documents serialized as
//! TOML. Mutation happens on the parsed struct, never via textual
//! find/replace, and parsing fails explicitly when a required field is
//! absent.

pub mod error;
pub mod machine;
pub mod sim;

pub use error::{HypervisorError, HypervisorResult};
pub use machine::{DiskConfig, MachineConfig};
pub use sim::SimHypervisor;

/// Capability interface to a virtualization management layer.
///
/// Constructing a backend is the "connect" step; a backend that loses its
/// connection reports [`HypervisorError::ConnectionLost`] from every call,
/// which callers treat as fatal.
///
/// Read operations must be safe to issue concurrently from multiple tasks;
/// `define` and `start` are only ever called from a single provisioning
/// path at a time.
pub trait Hypervisor: Send + Sync {
    /// Names of all machines currently known to the backend (defined or
    /// running).
    fn list_names(&self) -> HypervisorResult<Vec<String>>;

    /// Cumulative CPU time consumed by the machine, in nanoseconds, summed
    /// across all of its vCPUs.
    fn cpu_time_ns(&self, name: &str) -> HypervisorResult<u64>;

    /// Number of vCPUs assigned to the machine.
    fn vcpu_count(&self, name: &str) -> HypervisorResult<u32>;

    /// The machine's configuration descriptor as structured text (TOML).
    fn config_descriptor(&self, name: &str) -> HypervisorResult<String>;

    /// The machine's unique identity string.
    fn identity(&self, name: &str) -> HypervisorResult<String>;

    /// Register a new machine from a descriptor without starting it.
    /// Returns the name of the defined machine.
    fn define(&self, descriptor: &str) -> HypervisorResult<String>;

    /// Start a previously defined machine.
    fn start(&self, name: &str) -> HypervisorResult<()>;
}

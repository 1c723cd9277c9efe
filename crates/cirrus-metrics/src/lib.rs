//! cirrus-metrics — CPU utilization sampling.
//!
//! Computes a utilization percentage for a machine from two time-separated
//! cumulative CPU-time readings, normalized by elapsed wall time and vCPU
//! count:
//!
//! ```text
//! utilization = (cpu_time_delta_ns / (elapsed_secs * vcpus * 1e9)) * 100
//! ```
//!
//! The decision path consumes the raw value (it can exceed 100 on
//! multi-core bursts); display consumers use the clamped
//! [`UtilizationSample::display_percent`] variant.

pub mod sampler;

pub use sampler::{CpuSampler, SampleError, UtilizationSample, utilization_percent};

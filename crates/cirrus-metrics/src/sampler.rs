//! CPU utilization sampler.
//!
//! One sample is two CPU-time readings separated by the measurement
//! interval. Fleet sampling fans out one task per machine so a cycle costs
//! a single interval regardless of fleet size; each machine keeps its own
//! independent t0/t1 window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

use cirrus_hypervisor::{Hypervisor, HypervisorError};

/// Errors from a single sampling attempt.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The machine could not be resolved. Callers skip the machine for
    /// this cycle rather than aborting.
    #[error("instance unreachable: {0}")]
    Unreachable(String),

    /// The backend connection is gone. Fatal; propagates past the cycle.
    #[error(transparent)]
    ConnectionLost(HypervisorError),
}

impl From<HypervisorError> for SampleError {
    fn from(e: HypervisorError) -> Self {
        match e {
            HypervisorError::InstanceNotFound(name) => SampleError::Unreachable(name),
            HypervisorError::ConnectionLost(_) => SampleError::ConnectionLost(e),
            other => SampleError::Unreachable(other.to_string()),
        }
    }
}

/// One completed measurement for a machine. Transient; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationSample {
    pub name: String,
    pub cpu_ns_start: u64,
    pub cpu_ns_end: u64,
    pub elapsed: Duration,
    pub vcpus: u32,
}

impl UtilizationSample {
    /// Raw utilization percentage. Not clamped: a burst across multiple
    /// cores can exceed 100. This is the value scaling decisions use.
    pub fn percent(&self) -> f64 {
        utilization_percent(
            self.cpu_ns_end.saturating_sub(self.cpu_ns_start),
            self.elapsed.as_secs_f64(),
            self.vcpus,
        )
    }

    /// Utilization clamped to [0, 100] for display/plotting consumers.
    /// Never feed this into a scaling decision.
    pub fn display_percent(&self) -> f64 {
        self.percent().clamp(0.0, 100.0)
    }
}

/// Normalize a CPU-time delta into a percentage.
///
/// Returns exactly 0.0 for a non-positive elapsed time (clock anomaly) or
/// a zero vCPU count, never an error and never NaN.
pub fn utilization_percent(delta_ns: u64, elapsed_secs: f64, vcpus: u32) -> f64 {
    if elapsed_secs <= 0.0 || vcpus == 0 {
        return 0.0;
    }
    (delta_ns as f64 / (elapsed_secs * f64::from(vcpus) * 1e9)) * 100.0
}

/// Samples CPU utilization through a hypervisor backend.
#[derive(Clone)]
pub struct CpuSampler {
    hypervisor: Arc<dyn Hypervisor>,
    /// Wait between the two CPU-time readings of one sample.
    measurement_interval: Duration,
}

impl CpuSampler {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, measurement_interval: Duration) -> Self {
        Self {
            hypervisor,
            measurement_interval,
        }
    }

    /// Measure one machine over the measurement interval.
    ///
    /// Takes a reading, suspends the task for the interval, takes a second
    /// reading, and normalizes by the actually elapsed wall time. Purely
    /// observational.
    pub async fn sample(&self, name: &str) -> Result<UtilizationSample, SampleError> {
        let vcpus = self.hypervisor.vcpu_count(name)?;
        let cpu_ns_start = self.hypervisor.cpu_time_ns(name)?;
        let t0 = Instant::now();

        tokio::time::sleep(self.measurement_interval).await;

        let cpu_ns_end = self.hypervisor.cpu_time_ns(name)?;
        let elapsed = t0.elapsed();

        Ok(UtilizationSample {
            name: name.to_string(),
            cpu_ns_start,
            cpu_ns_end,
            elapsed,
            vcpus,
        })
    }

    /// Sample every machine in the roster concurrently.
    ///
    /// Returns `name → Some(raw percent)` for readable machines and
    /// `name → None` for unreachable ones; one machine failing never
    /// aborts the others. Only a lost backend connection is returned as
    /// an error.
    pub async fn sample_fleet(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Option<f64>>, SampleError> {
        let mut tasks = JoinSet::new();
        for name in names {
            let sampler = self.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = sampler.sample(&name).await;
                (name, result)
            });
        }

        let mut samples = HashMap::with_capacity(names.len());
        while let Some(joined) = tasks.join_next().await {
            let Ok((name, result)) = joined else {
                // A panicked sampling task counts as unreadable.
                continue;
            };
            match result {
                Ok(sample) => {
                    samples.insert(name, Some(sample.percent()));
                }
                Err(SampleError::Unreachable(reason)) => {
                    warn!(target: "monitor", instance = %name, %reason, "unable to access instance");
                    samples.insert(name, None);
                }
                Err(fatal @ SampleError::ConnectionLost(_)) => return Err(fatal),
            }
        }
        Ok(samples)
    }
}

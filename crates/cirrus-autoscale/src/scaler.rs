//! Autoscaler — samples the fleet, decides, and provisions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use cirrus_hypervisor::Hypervisor;
use cirrus_metrics::CpuSampler;
use cirrus_provision::Provisioner;

/// Decide whether to scale out.
///
/// Any-of with strict greater-than; `None` samples (unreachable machines)
/// are excluded from the OR. Pure: no state is kept between calls, and the
/// decision is recomputed fresh every cycle.
pub fn should_scale(samples: &HashMap<String, Option<f64>>, threshold: f64) -> bool {
    samples.values().flatten().any(|&percent| percent > threshold)
}

/// What the loop does after a successful scale-out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalePolicy {
    /// Provision once, then exit the loop. The faithful default.
    SingleShot,
    /// Keep monitoring; suppress further scale-outs for the cooldown
    /// window after each provisioning.
    Continuous { cooldown: Duration },
}

/// Construction parameters for the [`Autoscaler`].
#[derive(Debug, Clone)]
pub struct AutoscalerSettings {
    /// Instance names evaluated every cycle.
    pub fleet: Vec<String>,
    /// Machine whose config and disk get cloned on scale-out.
    pub template: String,
    /// Utilization percentage above which scale-out triggers.
    pub threshold_percent: f64,
    /// Sleep between cycles.
    pub check_interval: Duration,
    pub policy: ScalePolicy,
}

/// The control loop: sample-all → decide → (maybe) provision → sleep.
pub struct Autoscaler {
    hypervisor: Arc<dyn Hypervisor>,
    sampler: CpuSampler,
    provisioner: Provisioner,
    settings: AutoscalerSettings,
    /// When the last scale-out happened (continuous policy only).
    last_scale_out: Option<Instant>,
}

impl Autoscaler {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        sampler: CpuSampler,
        provisioner: Provisioner,
        settings: AutoscalerSettings,
    ) -> Self {
        Self {
            hypervisor,
            sampler,
            provisioner,
            settings,
            last_scale_out: None,
        }
    }

    /// Run one sampling/decision cycle. Returns `Ok(true)` if a new
    /// instance was provisioned.
    ///
    /// Per-instance sampling failures are logged and excluded; only a lost
    /// backend connection or a failed provisioning attempt is an error.
    pub async fn run_cycle(&mut self) -> anyhow::Result<bool> {
        let samples = self.sampler.sample_fleet(&self.settings.fleet).await?;

        // Report in roster order, one line per machine.
        for name in &self.settings.fleet {
            match samples.get(name) {
                Some(Some(percent)) => {
                    info!(target: "monitor", instance = %name, percent = %format_args!("{percent:.2}"), "cpu usage");
                }
                _ => {
                    info!(target: "monitor", instance = %name, "cpu usage unreadable, skipped");
                }
            }
        }

        if !should_scale(&samples, self.settings.threshold_percent) {
            return Ok(false);
        }

        if self.in_cooldown() {
            debug!(target: "autoscaler", "over threshold but inside cooldown window");
            return Ok(false);
        }

        info!(
            target: "autoscaler",
            threshold = self.settings.threshold_percent,
            "high cpu usage detected, creating a new server"
        );

        // Provisioning is serialized by construction: one attempt at a
        // time, inline in the loop.
        let existing: HashSet<String> = self.hypervisor.list_names()?.into_iter().collect();
        let new_name = self
            .provisioner
            .clone_and_start(&self.settings.template, &existing)?;

        self.last_scale_out = Some(Instant::now());
        if let ScalePolicy::Continuous { .. } = self.settings.policy {
            // Fold the new instance into the monitored roster.
            self.settings.fleet.push(new_name);
        }
        Ok(true)
    }

    fn in_cooldown(&self) -> bool {
        match (self.settings.policy, self.last_scale_out) {
            (ScalePolicy::Continuous { cooldown }, Some(at)) => at.elapsed() < cooldown,
            _ => false,
        }
    }

    /// Run until a single-shot scale-out completes, a fatal error occurs,
    /// or the shutdown signal fires.
    ///
    /// Cancellation is honored between cycles and during the inter-cycle
    /// sleep; an in-flight sample is allowed to finish its measurement
    /// window first.
    pub async fn run(
        &mut self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(
            target: "autoscaler",
            fleet = ?self.settings.fleet,
            template = %self.settings.template,
            threshold = self.settings.threshold_percent,
            check_interval_secs = self.settings.check_interval.as_secs_f64(),
            "autoscaler started"
        );

        loop {
            if *shutdown.borrow() {
                info!(target: "autoscaler", "autoscaler shutting down");
                return Ok(());
            }

            match self.run_cycle().await {
                Ok(true) if self.settings.policy == ScalePolicy::SingleShot => {
                    info!(target: "autoscaler", "single-shot scale-out complete, exiting loop");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    error!(target: "autoscaler", error = %e, "autoscaler halting");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                _ = shutdown.changed() => {
                    info!(target: "autoscaler", "autoscaler shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_hypervisor::{DiskConfig, MachineConfig, SimHypervisor};
    use cirrus_provision::{LocalStorage, Storage};
    use std::path::PathBuf;
    use tokio::sync::watch;

    fn samples(entries: &[(&str, Option<f64>)]) -> HashMap<String, Option<f64>> {
        entries
            .iter()
            .map(|(name, v)| (name.to_string(), *v))
            .collect()
    }

    #[test]
    fn scales_when_any_sample_exceeds_threshold() {
        let s = samples(&[("server1", Some(85.0)), ("server2", Some(40.0))]);
        assert!(should_scale(&s, 80.0));
    }

    #[test]
    fn no_scale_when_all_below_threshold() {
        let s = samples(&[("server1", Some(60.0)), ("server2", Some(40.0))]);
        assert!(!should_scale(&s, 80.0));
    }

    #[test]
    fn threshold_is_strict_greater_than() {
        let s = samples(&[("server1", Some(80.0)), ("server2", Some(80.0))]);
        assert!(!should_scale(&s, 80.0));
    }

    #[test]
    fn empty_sample_set_never_scales() {
        assert!(!should_scale(&HashMap::new(), 80.0));
    }

    #[test]
    fn unreadable_samples_are_excluded() {
        let s = samples(&[("server1", None), ("server2", None)]);
        assert!(!should_scale(&s, 80.0));
        // An unreadable machine is not treated as 100%.
        let s = samples(&[("server1", None), ("server2", Some(50.0))]);
        assert!(!should_scale(&s, 80.0));
    }

    #[test]
    fn burst_above_100_still_triggers() {
        let s = samples(&[("server1", Some(130.0))]);
        assert!(should_scale(&s, 80.0));
    }

    // -- loop tests against the simulated backend --------------------

    fn make_config(name: &str, disk: PathBuf) -> MachineConfig {
        MachineConfig {
            name: name.to_string(),
            uuid: format!("uuid-{name}"),
            vcpus: 1,
            memory_kib: 512 * 1024,
            disk: DiskConfig {
                path: disk,
                format: "qcow2".to_string(),
            },
        }
    }

    struct Fixture {
        hypervisor: Arc<SimHypervisor>,
        autoscaler: Autoscaler,
        _dir: tempfile::TempDir,
    }

    fn fixture(policy: ScalePolicy) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()));
        std::fs::write(storage.image_path("server1"), b"base").unwrap();

        let hv = Arc::new(SimHypervisor::new());
        hv.add_machine(make_config("server1", storage.image_path("server1")));
        hv.add_machine(make_config("server2", storage.image_path("server2")));

        let hypervisor: Arc<dyn Hypervisor> = hv.clone();
        let sampler = CpuSampler::new(hypervisor.clone(), Duration::from_millis(20));
        let provisioner = Provisioner::new(hypervisor.clone(), storage, "server");
        let autoscaler = Autoscaler::new(
            hypervisor,
            sampler,
            provisioner,
            AutoscalerSettings {
                fleet: vec!["server1".to_string(), "server2".to_string()],
                template: "server1".to_string(),
                threshold_percent: 80.0,
                check_interval: Duration::from_millis(10),
                policy,
            },
        );

        Fixture {
            hypervisor: hv,
            autoscaler,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn single_shot_scales_out_and_exits() {
        let mut fx = fixture(ScalePolicy::SingleShot);
        // server1 hot, server2 idle.
        fx.hypervisor.set_busy("server1", 0.95);
        fx.hypervisor.set_busy("server2", 0.10);

        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(5), fx.autoscaler.run(rx))
            .await
            .expect("loop should exit on its own")
            .unwrap();

        // Lowest unused name was picked and the clone is running.
        let names = fx.hypervisor.list_names().unwrap();
        assert_eq!(names, vec!["server1", "server2", "server3"]);
        assert!(fx.hypervisor.is_running("server3"));
    }

    #[tokio::test]
    async fn idle_fleet_never_provisions() {
        let mut fx = fixture(ScalePolicy::SingleShot);
        fx.hypervisor.set_busy("server1", 0.10);
        fx.hypervisor.set_busy("server2", 0.10);

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });

        fx.autoscaler.run(rx).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(
            fx.hypervisor.list_names().unwrap(),
            vec!["server1", "server2"]
        );
    }

    #[tokio::test]
    async fn cycle_skips_unreachable_instance() {
        let mut fx = fixture(ScalePolicy::SingleShot);
        fx.autoscaler.settings.fleet.push("ghost".to_string());
        fx.hypervisor.set_busy("server1", 0.10);
        fx.hypervisor.set_busy("server2", 0.10);

        // A dead roster entry must not abort the cycle or trigger scaling.
        let provisioned = fx.autoscaler.run_cycle().await.unwrap();
        assert!(!provisioned);
    }

    #[tokio::test]
    async fn lost_connection_is_fatal() {
        let mut fx = fixture(ScalePolicy::SingleShot);
        fx.hypervisor.sever();

        let (_tx, rx) = watch::channel(false);
        assert!(fx.autoscaler.run(rx).await.is_err());
    }

    #[tokio::test]
    async fn continuous_policy_respects_cooldown() {
        let mut fx = fixture(ScalePolicy::Continuous {
            cooldown: Duration::from_secs(60),
        });
        fx.hypervisor.set_busy("server1", 0.95);

        let first = fx.autoscaler.run_cycle().await.unwrap();
        assert!(first);
        // New instance joined the monitored roster.
        assert!(fx.autoscaler.settings.fleet.contains(&"server3".to_string()));

        // Still hot, but inside the cooldown window: no second scale-out.
        let second = fx.autoscaler.run_cycle().await.unwrap();
        assert!(!second);
        assert_eq!(fx.hypervisor.list_names().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn provisioning_failure_halts_loop() {
        let mut fx = fixture(ScalePolicy::SingleShot);
        fx.hypervisor.set_busy("server1", 0.95);
        fx.hypervisor.set_define_error(true);

        let (_tx, rx) = watch::channel(false);
        let err = fx.autoscaler.run(rx).await.unwrap_err();
        assert!(err.to_string().contains("registering"));
    }
}

//! cirrusd — the Cirrus autoscaling daemon.
//!
//! Assembles the subsystems around one control loop:
//! - Hypervisor backend (the bundled simulator, or any [`Hypervisor`]
//!   implementation wired in at build time)
//! - CPU sampler
//! - Instance provisioner
//! - Autoscaler loop
//!
//! # Usage
//!
//! ```text
//! cirrusd run --config cirrus.toml
//! cirrusd run --fleet server1,server2 --template server1 \
//!     --image-dir /tmp/images --backend sim --sim-busy server1=0.95
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use cirrus_autoscale::{Autoscaler, AutoscalerSettings};
use cirrus_hypervisor::{DiskConfig, Hypervisor, MachineConfig, SimHypervisor};
use cirrus_metrics::CpuSampler;
use cirrus_provision::{LocalStorage, Provisioner, Storage};

use config::AutoscaleConfig;

#[derive(Parser)]
#[command(name = "cirrusd", about = "Cirrus VM autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaling control loop.
    Run {
        /// Path to a cirrus.toml config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Instance names to monitor (comma-separated). Overrides the file.
        #[arg(long, value_delimiter = ',')]
        fleet: Option<Vec<String>>,

        /// Template instance cloned on scale-out. Overrides the file.
        #[arg(long)]
        template: Option<String>,

        /// Scale-out threshold percentage. Overrides the file.
        #[arg(long)]
        threshold: Option<f64>,

        /// Seconds between cycles. Overrides the file.
        #[arg(long)]
        check_interval: Option<u64>,

        /// Seconds between the two CPU-time readings. Overrides the file.
        #[arg(long)]
        measurement_interval: Option<u64>,

        /// Disk image directory. Overrides the file.
        #[arg(long)]
        image_dir: Option<PathBuf>,

        /// Hypervisor backend. Only "sim" ships with the daemon; real
        /// virtualization layers integrate via the Hypervisor trait.
        #[arg(long, default_value = "sim")]
        backend: String,

        /// Busy fraction for a simulated machine, e.g. "server1=0.95".
        /// Repeatable. Sim backend only.
        #[arg(long = "sim-busy", value_name = "NAME=FRACTION")]
        sim_busy: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().expect("static filter")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            fleet,
            template,
            threshold,
            check_interval,
            measurement_interval,
            image_dir,
            backend,
            sim_busy,
        } => {
            let mut cfg = load_config(config.as_deref(), fleet, template)?;
            if let Some(v) = threshold {
                cfg.threshold_percent = v;
            }
            if let Some(v) = check_interval {
                cfg.check_interval_secs = v;
            }
            if let Some(v) = measurement_interval {
                cfg.measurement_interval_secs = v;
            }
            if let Some(v) = image_dir {
                cfg.image_dir = v;
            }
            run(cfg, &backend, &sim_busy).await
        }
    }
}

/// Load the config file if given, otherwise build one from the required
/// flags.
fn load_config(
    path: Option<&std::path::Path>,
    fleet: Option<Vec<String>>,
    template: Option<String>,
) -> anyhow::Result<AutoscaleConfig> {
    let mut cfg = match path {
        Some(p) => AutoscaleConfig::from_file(p)
            .with_context(|| format!("reading config {}", p.display()))?,
        None => {
            let (Some(fleet), Some(template)) = (fleet.clone(), template.clone()) else {
                bail!("either --config or both --fleet and --template are required");
            };
            AutoscaleConfig::new(fleet, template)
        }
    };
    // Flags override the file.
    if let Some(fleet) = fleet {
        cfg.fleet = fleet;
    }
    if let Some(template) = template {
        cfg.template = template;
    }
    if cfg.fleet.is_empty() {
        bail!("fleet roster is empty");
    }
    Ok(cfg)
}

async fn run(cfg: AutoscaleConfig, backend: &str, sim_busy: &[String]) -> anyhow::Result<()> {
    info!(
        fleet = ?cfg.fleet,
        template = %cfg.template,
        threshold = cfg.threshold_percent,
        image_dir = %cfg.image_dir.display(),
        "cirrusd starting"
    );

    std::fs::create_dir_all(&cfg.image_dir)
        .with_context(|| format!("creating image dir {}", cfg.image_dir.display()))?;
    let storage = Arc::new(LocalStorage::new(cfg.image_dir.clone()));

    // Constructing the backend is the "connect" step; a failure here is
    // fatal and exits nonzero.
    let hypervisor: Arc<dyn Hypervisor> = match backend {
        "sim" => build_sim_backend(&cfg, storage.as_ref(), sim_busy)?,
        other => bail!(
            "unknown backend '{other}'; real virtualization layers integrate \
             via the cirrus-hypervisor::Hypervisor trait"
        ),
    };
    info!(%backend, "hypervisor backend ready");

    let sampler = CpuSampler::new(hypervisor.clone(), cfg.measurement_interval());
    let provisioner = Provisioner::new(hypervisor.clone(), storage, cfg.name_prefix.clone());
    let mut autoscaler = Autoscaler::new(
        hypervisor,
        sampler,
        provisioner,
        AutoscalerSettings {
            fleet: cfg.fleet.clone(),
            template: cfg.template.clone(),
            threshold_percent: cfg.threshold_percent,
            check_interval: cfg.check_interval(),
            policy: cfg.scale_policy(),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    autoscaler.run(shutdown_rx).await?;
    info!("cirrusd stopped");
    Ok(())
}

/// Seed the simulated backend with the fleet roster.
///
/// Each machine gets a descriptor pointing at its image path; the
/// template's image file is created if absent so a demo scale-out can
/// actually copy something.
fn build_sim_backend(
    cfg: &AutoscaleConfig,
    storage: &LocalStorage,
    sim_busy: &[String],
) -> anyhow::Result<Arc<dyn Hypervisor>> {
    let hv = Arc::new(SimHypervisor::new());

    for name in &cfg.fleet {
        hv.add_machine(MachineConfig {
            name: name.clone(),
            uuid: uuid::Uuid::new_v4().to_string(),
            vcpus: 2,
            memory_kib: 2 * 1024 * 1024,
            disk: DiskConfig {
                path: storage.image_path(name),
                format: "qcow2".to_string(),
            },
        });
    }

    let template_image = storage.image_path(&cfg.template);
    if !storage.exists(&template_image) {
        std::fs::write(&template_image, b"cirrus-sim-image")
            .with_context(|| format!("seeding {}", template_image.display()))?;
        info!(path = %template_image.display(), "seeded template disk image");
    }

    for entry in sim_busy {
        let (name, busy) = parse_busy(entry)?;
        hv.set_busy(&name, busy);
        info!(instance = %name, busy, "simulated load set");
    }

    Ok(hv)
}

/// Parse a "name=fraction" pair.
fn parse_busy(entry: &str) -> anyhow::Result<(String, f64)> {
    let Some((name, fraction)) = entry.split_once('=') else {
        bail!("expected NAME=FRACTION, got '{entry}'");
    };
    let busy: f64 = fraction
        .parse()
        .with_context(|| format!("invalid fraction in '{entry}'"))?;
    if !(0.0..=4.0).contains(&busy) {
        bail!("busy fraction out of range in '{entry}'");
    }
    Ok((name.to_string(), busy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_busy_pair() {
        assert_eq!(parse_busy("server1=0.95").unwrap(), ("server1".to_string(), 0.95));
    }

    #[test]
    fn parse_busy_rejects_garbage() {
        assert!(parse_busy("server1").is_err());
        assert!(parse_busy("server1=high").is_err());
        assert!(parse_busy("server1=9.5").is_err());
    }

    #[test]
    fn flags_alone_build_a_config() {
        let cfg = load_config(
            None,
            Some(vec!["server1".to_string(), "server2".to_string()]),
            Some("server1".to_string()),
        )
        .unwrap();
        assert_eq!(cfg.fleet.len(), 2);
        assert_eq!(cfg.template, "server1");
        assert_eq!(cfg.threshold_percent, 80.0);
    }

    #[test]
    fn flags_require_fleet_and_template_without_file() {
        assert!(load_config(None, None, None).is_err());
        assert!(load_config(None, Some(vec!["server1".to_string()]), None).is_err());
    }

    #[test]
    fn file_values_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cirrus.toml");
        std::fs::write(
            &path,
            "fleet = [\"server1\"]\ntemplate = \"server1\"\nthreshold_percent = 70.0\n",
        )
        .unwrap();

        let cfg = load_config(Some(path.as_path()), None, Some("server9".to_string())).unwrap();
        assert_eq!(cfg.template, "server9");
        assert_eq!(cfg.threshold_percent, 70.0);
    }
}

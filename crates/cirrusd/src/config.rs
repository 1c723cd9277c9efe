//! cirrus.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cirrus_autoscale::ScalePolicy;

/// Daemon configuration. Every knob the control loop uses comes from here;
/// nothing is hardcoded in the loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    /// Instance names monitored every cycle.
    pub fleet: Vec<String>,
    /// Machine cloned on scale-out.
    pub template: String,
    /// Utilization percentage that triggers scale-out.
    #[serde(default = "default_threshold")]
    pub threshold_percent: f64,
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub check_interval_secs: u64,
    /// Seconds between the two CPU-time readings of one sample.
    #[serde(default = "default_interval_secs")]
    pub measurement_interval_secs: u64,
    /// Directory holding disk images.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Naming prefix for generated instances.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// "single-shot" (default) or "continuous".
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum PolicyConfig {
    #[default]
    SingleShot,
    Continuous {
        #[serde(default = "default_cooldown_secs")]
        cooldown_secs: u64,
    },
}

fn default_threshold() -> f64 {
    80.0
}

fn default_interval_secs() -> u64 {
    1
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("/var/lib/cirrus/images")
}

fn default_name_prefix() -> String {
    "server".to_string()
}

fn default_cooldown_secs() -> u64 {
    60
}

impl AutoscaleConfig {
    /// Config with defaults for everything except the required fields.
    pub fn new(fleet: Vec<String>, template: impl Into<String>) -> Self {
        Self {
            fleet,
            template: template.into(),
            threshold_percent: default_threshold(),
            check_interval_secs: default_interval_secs(),
            measurement_interval_secs: default_interval_secs(),
            image_dir: default_image_dir(),
            name_prefix: default_name_prefix(),
            policy: PolicyConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AutoscaleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn measurement_interval(&self) -> Duration {
        Duration::from_secs(self.measurement_interval_secs)
    }

    pub fn scale_policy(&self) -> ScalePolicy {
        match self.policy {
            PolicyConfig::SingleShot => ScalePolicy::SingleShot,
            PolicyConfig::Continuous { cooldown_secs } => ScalePolicy::Continuous {
                cooldown: Duration::from_secs(cooldown_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let text = r#"
fleet = ["server1", "server2"]
template = "server1"
"#;
        let config: AutoscaleConfig = toml::from_str(text).unwrap();
        assert_eq!(config.fleet, vec!["server1", "server2"]);
        assert_eq!(config.threshold_percent, 80.0);
        assert_eq!(config.check_interval_secs, 1);
        assert_eq!(config.name_prefix, "server");
        assert_eq!(config.scale_policy(), ScalePolicy::SingleShot);
    }

    #[test]
    fn parse_continuous_policy() {
        let text = r#"
fleet = ["server1"]
template = "server1"

[policy]
mode = "continuous"
cooldown_secs = 120
"#;
        let config: AutoscaleConfig = toml::from_str(text).unwrap();
        assert_eq!(
            config.scale_policy(),
            ScalePolicy::Continuous {
                cooldown: Duration::from_secs(120)
            }
        );
    }

    #[test]
    fn missing_fleet_is_rejected() {
        let text = r#"template = "server1""#;
        assert!(toml::from_str::<AutoscaleConfig>(text).is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let text = r#"
fleet = ["server1", "server2"]
template = "server1"
threshold_percent = 75.0
image_dir = "/tmp/images"
"#;
        let config: AutoscaleConfig = toml::from_str(text).unwrap();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: AutoscaleConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.threshold_percent, 75.0);
        assert_eq!(reparsed.image_dir, PathBuf::from("/tmp/images"));
    }
}

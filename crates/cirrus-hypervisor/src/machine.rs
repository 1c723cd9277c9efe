//! Typed machine descriptors.
//!
//! A `MachineConfig` is the structured equivalent of a hypervisor domain
//! document. Cloning a machine mutates the parsed struct (name, identity,
//! disk path) and re-serializes it; there is no textual substitution, so a
//! descriptor missing a required field fails loudly at parse time instead
//! of producing a half-edited document.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, HypervisorResult};

/// Configuration descriptor for a single machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    /// Unique machine name.
    pub name: String,
    /// Unique identity (UUID string).
    pub uuid: String,
    /// Number of vCPUs.
    pub vcpus: u32,
    /// Memory allocation in KiB.
    pub memory_kib: u64,
    /// Backing storage for the machine's primary disk.
    pub disk: DiskConfig,
}

/// Backing disk reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskConfig {
    /// Path to the disk image on the storage medium.
    pub path: PathBuf,
    /// Image format, e.g. "qcow2".
    pub format: String,
}

impl MachineConfig {
    /// Parse a descriptor from its TOML text form.
    ///
    /// Fails with `InvalidConfig` if the document is malformed or any
    /// required field (`name`, `uuid`, `vcpus`, `memory_kib`, `disk.path`,
    /// `disk.format`) is absent.
    pub fn from_toml(text: &str) -> HypervisorResult<Self> {
        toml::from_str(text).map_err(|e| HypervisorError::InvalidConfig(e.to_string()))
    }

    /// Serialize the descriptor back to TOML text.
    pub fn to_toml(&self) -> HypervisorResult<String> {
        toml::to_string_pretty(self).map_err(|e| HypervisorError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
name = "server1"
uuid = "11111111-2222-3333-4444-555555555555"
vcpus = 2
memory_kib = 2097152

[disk]
path = "/var/lib/cirrus/images/server1.qcow2"
format = "qcow2"
"#;

    #[test]
    fn parse_full_descriptor() {
        let config = MachineConfig::from_toml(DESCRIPTOR).unwrap();
        assert_eq!(config.name, "server1");
        assert_eq!(config.vcpus, 2);
        assert_eq!(
            config.disk.path,
            PathBuf::from("/var/lib/cirrus/images/server1.qcow2")
        );
    }

    #[test]
    fn missing_uuid_is_rejected() {
        let text = DESCRIPTOR.replace("uuid = \"11111111-2222-3333-4444-555555555555\"\n", "");
        let err = MachineConfig::from_toml(&text).unwrap_err();
        assert!(matches!(err, HypervisorError::InvalidConfig(_)));
    }

    #[test]
    fn missing_disk_section_is_rejected() {
        let text = DESCRIPTOR.split("[disk]").next().unwrap().to_string();
        assert!(MachineConfig::from_toml(&text).is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = MachineConfig::from_toml(DESCRIPTOR).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(MachineConfig::from_toml(&text).unwrap(), config);
    }
}

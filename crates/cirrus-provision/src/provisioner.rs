//! The clone-and-start provisioning sequence.
//!
//! A provisioning attempt walks a fixed step sequence; any step can fail
//! and every failure is terminal for the attempt:
//!
//! ```text
//! ResolvingTemplate → NamingNewInstance → BuildingConfig
//!     → CopyingStorage → Registering → Starting → Started
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use cirrus_hypervisor::{Hypervisor, HypervisorError, MachineConfig};

use crate::error::{ProvisionError, ProvisionResult};
use crate::storage::Storage;

/// Steps of a provisioning attempt, in order. `Started` and a failure are
/// the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    ResolvingTemplate,
    NamingNewInstance,
    BuildingConfig,
    CopyingStorage,
    Registering,
    Starting,
    Started,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionStep::ResolvingTemplate => "resolving-template",
            ProvisionStep::NamingNewInstance => "naming-new-instance",
            ProvisionStep::BuildingConfig => "building-config",
            ProvisionStep::CopyingStorage => "copying-storage",
            ProvisionStep::Registering => "registering",
            ProvisionStep::Starting => "starting",
            ProvisionStep::Started => "started",
        };
        f.write_str(s)
    }
}

/// Pick the lowest unused `<prefix><N>` name, N starting at 1.
///
/// Deterministic: the same existing-name set always yields the same name,
/// and gaps are filled before the sequence is extended.
pub fn next_instance_name(prefix: &str, existing: &HashSet<String>) -> String {
    let mut n = 1u32;
    loop {
        let candidate = format!("{prefix}{n}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Clones a template machine's descriptor and disk to provision a new
/// instance.
pub struct Provisioner {
    hypervisor: Arc<dyn Hypervisor>,
    storage: Arc<dyn Storage>,
    /// Naming scheme prefix for generated instances.
    name_prefix: String,
}

impl Provisioner {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        storage: Arc<dyn Storage>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            hypervisor,
            storage,
            name_prefix: name_prefix.into(),
        }
    }

    /// Clone `template` into a freshly named instance and start it.
    ///
    /// Returns the new instance's name. On failure after the disk copy the
    /// duplicated image is left in place and reported; operator cleanup is
    /// expected.
    pub fn clone_and_start(
        &self,
        template: &str,
        existing: &HashSet<String>,
    ) -> ProvisionResult<String> {
        let step = ProvisionStep::ResolvingTemplate;
        info!(target: "autoscaler", %step, %template, "provisioning new instance");

        let descriptor = match self.hypervisor.config_descriptor(template) {
            Ok(d) => d,
            Err(HypervisorError::InstanceNotFound(_)) => {
                return Err(ProvisionError::TemplateNotFound(template.to_string()));
            }
            Err(e) => return Err(ProvisionError::at(step, e)),
        };
        let template_config =
            MachineConfig::from_toml(&descriptor).map_err(|e| ProvisionError::at(step, e))?;

        let step = ProvisionStep::NamingNewInstance;
        let new_name = next_instance_name(&self.name_prefix, existing);
        info!(target: "autoscaler", %step, instance = %new_name, "name assigned");

        let step = ProvisionStep::BuildingConfig;
        let base_image = template_config.disk.path.clone();
        let new_image = self.storage.image_path(&new_name);

        let mut config = template_config;
        config.name = new_name.clone();
        config.uuid = Uuid::new_v4().to_string();
        config.disk.path = new_image.clone();
        info!(target: "autoscaler", %step, instance = %new_name, uuid = %config.uuid, "descriptor built");

        // Never define a machine over a dangling disk reference.
        if !self.storage.exists(&base_image) {
            return Err(ProvisionError::BaseImageMissing(base_image));
        }

        let step = ProvisionStep::CopyingStorage;
        let bytes = self
            .storage
            .copy(&base_image, &new_image)
            .map_err(|e| ProvisionError::at(step, e))?;
        info!(
            target: "autoscaler",
            %step,
            from = %base_image.display(),
            to = %new_image.display(),
            bytes,
            "disk image copied"
        );

        let step = ProvisionStep::Registering;
        let new_descriptor = config.to_toml().map_err(|e| ProvisionError::at(step, e))?;
        if let Err(e) = self.hypervisor.define(&new_descriptor) {
            self.report_orphan(&new_name, &new_image);
            return Err(ProvisionError::at(step, e));
        }
        info!(target: "autoscaler", %step, instance = %new_name, "instance defined");

        let step = ProvisionStep::Starting;
        if let Err(e) = self.hypervisor.start(&new_name) {
            self.report_orphan(&new_name, &new_image);
            return Err(ProvisionError::at(step, e));
        }

        info!(
            target: "autoscaler",
            step = %ProvisionStep::Started,
            instance = %new_name,
            "new instance created and started"
        );
        Ok(new_name)
    }

    /// No rollback: the copied disk stays behind on a late failure so the
    /// operator can inspect or remove it.
    fn report_orphan(&self, instance: &str, image: &std::path::Path) {
        warn!(
            target: "autoscaler",
            %instance,
            image = %image.display(),
            "provisioning aborted after disk copy; orphaned image left for cleanup"
        );
    }
}

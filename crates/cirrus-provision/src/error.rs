//! Provisioning error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::provisioner::ProvisionStep;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that abort a provisioning attempt. All are fatal to the attempt;
/// there is no retry.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("base disk image missing: {}", .0.display())]
    BaseImageMissing(PathBuf),

    #[error("provisioning failed during {step}: {cause}")]
    ProvisioningFailed {
        step: ProvisionStep,
        #[source]
        cause: anyhow::Error,
    },
}

impl ProvisionError {
    pub(crate) fn at(step: ProvisionStep, cause: impl Into<anyhow::Error>) -> Self {
        ProvisionError::ProvisioningFailed {
            step,
            cause: cause.into(),
        }
    }
}

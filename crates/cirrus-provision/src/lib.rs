//! cirrus-provision — template cloning.
//!
//! Provisions a new machine by duplicating a template's typed descriptor
//! and backing disk: resolve template → pick the lowest unused
//! `server<N>` name → rewrite name/identity/disk fields → copy the disk
//! image → define → start. There is no rollback; a disk copied before a
//! failed definition is surfaced for operator cleanup, never silently
//! removed.

pub mod error;
pub mod provisioner;
pub mod storage;

pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{ProvisionStep, Provisioner, next_instance_name};
pub use storage::{LocalStorage, Storage};

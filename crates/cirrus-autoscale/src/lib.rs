//! cirrus-autoscale — the scale-out control loop.
//!
//! Each cycle samples the whole fleet concurrently, logs per-instance
//! utilization, and applies the any-of threshold rule: if any readable
//! machine is strictly above the threshold, a new instance is cloned from
//! the template.
//!
//! # Decision rule
//!
//! ```text
//! scale_out = any(sample > threshold for readable samples)
//! ```
//!
//! No hysteresis and no sustained-duration requirement: one over-threshold
//! sample triggers scaling. Unreadable machines are excluded from the OR
//! entirely (not 0%, not 100%).
//!
//! The default [`ScalePolicy::SingleShot`] stops the loop after the first
//! successful scale-out; [`ScalePolicy::Continuous`] keeps monitoring with
//! a cooldown between scale-outs.

pub mod scaler;

pub use scaler::{Autoscaler, AutoscalerSettings, ScalePolicy, should_scale};

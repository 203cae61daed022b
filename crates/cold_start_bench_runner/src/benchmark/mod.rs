//! The four benchmark components and the poll loop they share.

pub mod cold_start;
pub mod deploy;
pub mod poll;
pub mod scale_to_zero;
pub mod warm_load;

pub use cold_start::{ColdStartProber, ProbeSettings};
pub use deploy::{workload_spec, CleanupReport, DeployController, DeployError, DeploySettings};
pub use poll::{poll_until, PollError, PollOutcome};
pub use scale_to_zero::{ScaleToZeroDetector, ScaleToZeroError};
pub use warm_load::{WarmLoadError, WarmLoadGenerator, WarmLoadSettings};

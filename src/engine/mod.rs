//! External engine integration
//!
//! This module provides functionality for:
//! - Synthesizing capacity-bounded batch configurations with per-entry
//!   local listener ports
//! - Managing the external engine process as a scoped resource
//! - Polling the batch's listeners for readiness

pub mod config;
pub mod process;
pub mod readiness;

pub use config::{
    synthesize_batches, BatchPlan, BuildError, EngineConfig, PortAssignment, SynthesisOptions,
};
pub use process::{EngineHandle, EngineLauncher, XrayLauncher};
pub use readiness::{await_listeners, ReadinessOptions, ReadinessOutcome};

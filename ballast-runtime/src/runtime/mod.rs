mod error;
mod ramp;
#[allow(clippy::module_inception)]
mod runtime;
mod supervisor;
mod worker;
mod writer;

/// Runtime configuration
pub mod config;

/// Memory probes for the own process and the host
pub mod stats;

pub use error::Error;
pub use runtime::Runtime;

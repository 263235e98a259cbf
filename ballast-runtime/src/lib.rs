//! Ballast synthetic load generator

#![deny(missing_docs)]
#![deny(
    clippy::all,
    clippy::print_stderr,
    clippy::print_stdout,
    clippy::unwrap_used
)]

/// The ballast runtime: worker supervision, memory ramps and the disk writer.
pub mod runtime;

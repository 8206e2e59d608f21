//! Command line interface module
//!
//! Argument parsing and the runner that publishes images, resolves the
//! template and reports unreferenced images.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;

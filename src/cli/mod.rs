//! Command Line Interface (CLI) layer for tilepipe.
//!
//! This module defines argument parsing (`args`), CLI error types
//! (`errors`), and the orchestration logic (`runner`) that wires
//! user-provided options to the library pipeline.
//!
//! If you are embedding tilepipe into another application, prefer the
//! library API (`tilepipe::core::pipeline`) over calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;

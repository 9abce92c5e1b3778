//! tilepipe CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, run the tile
//! pipeline, and exit with a non-zero status when any tile failed.
//! For programmatic use, prefer the library API (`tilepipe::core`).

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)
}

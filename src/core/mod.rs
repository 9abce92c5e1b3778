//! Core pipeline machinery: grid addressing, window planning, the per-tile
//! transform engine, and the run orchestrator.
pub mod config;
pub mod engine;
pub mod formula;
pub mod grid;
pub mod layer;
pub mod pipeline;
pub mod planner;
pub mod raster;
pub mod tile;
pub mod window;

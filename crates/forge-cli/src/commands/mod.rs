//! Subcommand implementations.

pub mod config;
pub mod generate;
pub mod info;
pub mod preprocess;
pub mod remesh;
pub mod repair;
pub mod tier;
pub mod validate;

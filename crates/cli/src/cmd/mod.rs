//! CLI command implementations

pub mod clean;
pub mod config;
pub mod run;
pub mod status;

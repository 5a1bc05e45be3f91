//! CLI command implementations.

pub mod cluster;
pub mod migrations;
pub mod validate_config;

/// Database configuration and connection management
pub mod database;

/// Program rule configuration from config.toml
pub mod program;

/// Database configuration and connection management
pub mod database;

/// Service settings and allocation seeds loaded from config.toml
pub mod settings;

/// Listener settings read from environment variables
pub mod server;

// Compile-time constants from Cargo.toml and build.rs
pub const VERSION: &str = env!("AGENT_MANAGER_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#![forbid(unsafe_code)]

pub mod backend;
pub mod capacity;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod machine;
pub mod registry;
pub mod server;
pub mod utils;
pub mod version;

pub use error::{AgentManagerError, Result};

use crate::catalog::BoxCatalog;
use crate::error::{AgentManagerError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/jenkins-agent-manager/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub jenkins_api_url: String,

    #[serde(default)]
    pub jenkins_api_secret: String,

    /// Accepts `"8888"` as well as `8888`
    #[serde(
        default = "default_listener_port",
        deserialize_with = "deserialize_port"
    )]
    pub listener_port: u16,

    #[serde(default = "default_max_vm_count")]
    pub max_vm_count: usize,

    /// Root under which every machine gets its own Vagrant directory
    pub working_dir_path: PathBuf,

    #[serde(default)]
    pub boxes: Vec<BoxConfig>,

    /// Machine registry database (defaults to `<working_dir_path>/machines.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_jenkins_timeout")]
    pub jenkins_timeout_secs: u64,

    #[serde(default)]
    pub vagrant: VagrantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxConfig {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Size with unit, e.g. `"2048MB"`
    pub memory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VagrantConfig {
    #[serde(default = "default_vagrant_binary")]
    pub binary: String,

    /// Timeout for quick commands (init, status, snapshot save, halt, destroy)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for `up` and snapshot restore
    #[serde(default = "default_boot_timeout")]
    pub boot_timeout_secs: u64,
}

impl Default for VagrantConfig {
    fn default() -> Self {
        Self {
            binary: default_vagrant_binary(),
            command_timeout_secs: default_command_timeout(),
            boot_timeout_secs: default_boot_timeout(),
        }
    }
}

impl VagrantConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }
}

fn default_listener_port() -> u16 {
    8888
}

fn default_max_vm_count() -> usize {
    1
}

fn default_jenkins_timeout() -> u64 {
    10
}

fn default_vagrant_binary() -> String {
    "vagrant".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_boot_timeout() -> u64 {
    1800
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid listener_port '{}'", text))),
    }
}

impl Configuration {
    /// Load configuration with precedence:
    /// 1. Environment variables
    /// 2. Configuration file (JSON, or TOML when the file ends in `.toml`)
    /// 3. Built-in defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgentManagerError::InvalidConfig(format!(
                "cannot read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        if path.extension().is_some_and(|ext| ext == "toml") {
            Ok(toml::from_str(&contents)?)
        } else {
            Self::from_json(&contents)
        }
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Apply environment variable overrides
    fn merge_env(mut self) -> Result<Self> {
        if let Ok(count) = std::env::var("AGENT_MANAGER_MAX_VM_COUNT") {
            self.max_vm_count = count.trim().parse().map_err(|_| {
                AgentManagerError::InvalidConfig(format!(
                    "AGENT_MANAGER_MAX_VM_COUNT is not a number: {}",
                    count
                ))
            })?;
        }

        if let Ok(port) = std::env::var("AGENT_MANAGER_LISTENER_PORT") {
            self.listener_port = port.trim().parse().map_err(|_| {
                AgentManagerError::InvalidConfig(format!(
                    "AGENT_MANAGER_LISTENER_PORT is not a port: {}",
                    port
                ))
            })?;
        }

        if let Ok(secret) = std::env::var("JENKINS_API_SECRET") {
            self.jenkins_api_secret = secret;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_vm_count == 0 {
            return Err(AgentManagerError::InvalidConfig(
                "max_vm_count must be at least 1".to_string(),
            ));
        }
        if self.listener_port == 0 {
            return Err(AgentManagerError::InvalidConfig(
                "listener_port must not be 0".to_string(),
            ));
        }
        if self.working_dir_path.as_os_str().is_empty() {
            return Err(AgentManagerError::InvalidConfig(
                "working_dir_path must not be empty".to_string(),
            ));
        }

        self.catalog().map(|_| ())
    }

    pub fn catalog(&self) -> Result<BoxCatalog> {
        BoxCatalog::from_config(&self.boxes)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.working_dir_path.join("machines.db"))
    }

    pub fn jenkins_timeout(&self) -> Duration {
        Duration::from_secs(self.jenkins_timeout_secs)
    }
}

use super::{CapacityOracle, OracleError};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const SWAP_SPACE_MONITOR: &str = "hudson.node_monitors.SwapSpaceMonitor";
const CONTROLLER_NAMES: &[&str] = &["master", "Built-In Node"];

#[derive(Debug, Deserialize)]
struct ComputerSet {
    #[serde(default)]
    computer: Vec<Computer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Computer {
    display_name: String,
    /// Monitor values are `null` until a monitor has run once
    #[serde(default)]
    monitor_data: HashMap<String, Option<serde_json::Value>>,
}

/// Reads free memory of the Jenkins controller node from the Jenkins
/// computer API (`/computer/api/json`).
pub struct JenkinsMonitor {
    client: Client,
    url: String,
    secret: String,
}

impl JenkinsMonitor {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Result<Self, OracleError> {
        let url = format!("{}/computer/api/json", base_url.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| OracleError::Http {
                url: url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            url,
            secret: secret.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CapacityOracle for JenkinsMonitor {
    fn free_memory(&self) -> Result<u64, OracleError> {
        let mut request = self.client.get(&self.url).query(&[("depth", "2")]);
        if !self.secret.is_empty() {
            request = request.query(&[("token", self.secret.as_str())]);
        }

        let response = request.send().map_err(|source| OracleError::Http {
            url: self.url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(|source| OracleError::Http {
            url: self.url.clone(),
            source,
        })?;
        let free = available_memory(&body)?;

        debug!(url = %self.url, free, "Fetched controller memory");
        Ok(free)
    }
}

/// Extract the controller node's available physical memory from a
/// `/computer/api/json?depth=2` body.
fn available_memory(body: &str) -> Result<u64, OracleError> {
    let computers: ComputerSet =
        serde_json::from_str(body).map_err(|e| OracleError::Decode(e.to_string()))?;

    let controller = computers
        .computer
        .iter()
        .find(|c| CONTROLLER_NAMES.contains(&c.display_name.as_str()))
        .ok_or(OracleError::NodeMissing)?;

    controller
        .monitor_data
        .get(SWAP_SPACE_MONITOR)
        .and_then(Option::as_ref)
        .and_then(|monitor| monitor.get("availablePhysicalMemory"))
        .and_then(serde_json::Value::as_u64)
        .ok_or(OracleError::MemoryUnreported)
}

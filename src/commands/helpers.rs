use crate::backend::VagrantCli;
use crate::capacity::JenkinsMonitor;
use crate::config::Configuration;
use crate::error::{AgentManagerError, Result};
use crate::fleet::FleetController;
use crate::registry::SqliteRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Open the machine registry configured in `config`
pub fn open_registry(config: &Configuration) -> Result<SqliteRegistry> {
    SqliteRegistry::open(config.database_path())
        .map_err(|e| AgentManagerError::persistence("open registry", e))
}

/// Vagrant adapter, failing early when the binary is missing
pub fn vagrant(config: &Configuration) -> Result<VagrantCli> {
    let vagrant = VagrantCli::new(&config.vagrant);
    if !vagrant.is_installed() {
        return Err(AgentManagerError::VagrantNotInstalled);
    }
    Ok(vagrant)
}

/// Wire the real collaborators into a controller.
pub fn build_controller(config: &Configuration) -> Result<FleetController> {
    let vagrant = vagrant(config)?;
    let registry = open_registry(config)?;
    let oracle = JenkinsMonitor::new(
        &config.jenkins_api_url,
        &config.jenkins_api_secret,
        config.jenkins_timeout(),
    )?;

    std::fs::create_dir_all(&config.working_dir_path)?;

    Ok(FleetController::new(
        config.catalog()?,
        config.max_vm_count,
        config.working_dir_path.clone(),
        Arc::new(vagrant),
        Arc::new(oracle),
        Arc::new(registry),
    ))
}

/// Log configured boxes that vagrant does not have locally.
pub fn warn_missing_boxes(config: &Configuration, vagrant: &VagrantCli) {
    let installed = match vagrant.installed_boxes() {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!(error = %e, "Could not list installed vagrant boxes");
            return;
        }
    };

    for definition in &config.boxes {
        if installed.iter().any(|b| b.name == definition.name) {
            debug!(box_name = %definition.name, "Box installed");
        } else {
            warn!(
                box_name = %definition.name,
                labels = ?definition.labels,
                "Configured box is not installed; the first start will download it"
            );
        }
    }
}

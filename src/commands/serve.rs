use super::helpers;
use crate::config::Configuration;
use crate::error::Result;
use crate::server::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub fn execute(config: &Configuration) -> Result<()> {
    let vagrant = helpers::vagrant(config)?;
    helpers::warn_missing_boxes(config, &vagrant);

    let controller = Arc::new(helpers::build_controller(config)?);
    info!(
        labels = ?controller.catalog().labels(),
        max_vm_count = controller.max_vm_count(),
        working_dir = %controller.working_dir().display(),
        "Fleet controller ready"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listener_port));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(server::serve(
        addr,
        AppState::new(Arc::clone(&controller)),
        server::shutdown_signal(),
    ))?;

    // Waits for backend calls still running on the blocking pool
    drop(runtime);
    info!("Shutdown complete");
    Ok(())
}

use super::output::{self, InstalledBox};
use super::{BackendError, MachineStatus, VmBackend};
use crate::config::VagrantConfig;
use crate::utils::process::{self, CommandOutput};
use chrono::Utc;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// [`VmBackend`] that drives the `vagrant` command line tool.
///
/// Every machine lives in its own directory holding a `Vagrantfile`; all
/// commands run with that directory as the working directory.
#[derive(Debug, Clone)]
pub struct VagrantCli {
    binary: String,
    command_timeout: Duration,
    boot_timeout: Duration,
}

impl VagrantCli {
    pub fn new(config: &VagrantConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            command_timeout: config.command_timeout(),
            boot_timeout: config.boot_timeout(),
        }
    }

    /// Check if the vagrant binary can be found
    pub fn is_installed(&self) -> bool {
        process::command_exists(&self.binary)
    }

    /// Boxes available locally (`vagrant box list`)
    pub fn installed_boxes(&self) -> Result<Vec<InstalledBox>, BackendError> {
        let out = self.run(None, &["box", "list", "--machine-readable"], self.command_timeout)?;
        let lines = output::parse_machine_readable(&out.stdout)?;
        Ok(output::installed_boxes(&lines))
    }

    fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, BackendError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!(
            binary = %self.binary,
            args = ?args,
            dir = ?dir,
            timeout_secs = timeout.as_secs(),
            "Running vagrant"
        );
        process::run_with_timeout(&mut cmd, timeout)
    }
}

impl VmBackend for VagrantCli {
    fn exists(&self, path: &Path) -> bool {
        path.join("Vagrantfile").is_file()
    }

    fn initialize(&self, path: &Path, box_name: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(path)?;
        self.run(Some(path), &["init", "--force", box_name], self.command_timeout)?;
        Ok(())
    }

    fn boot(&self, path: &Path) -> Result<(), BackendError> {
        self.run(Some(path), &["up"], self.boot_timeout)?;
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<Vec<MachineStatus>, BackendError> {
        let out = self.run(
            Some(path),
            &["status", "--machine-readable"],
            self.command_timeout,
        )?;
        let lines = output::parse_machine_readable(&out.stdout)?;
        output::statuses(&lines)
    }

    fn snapshot(&self, path: &Path, label: &str) -> Result<String, BackendError> {
        let name = snapshot_name(label, Utc::now().timestamp());
        self.run(
            Some(path),
            &["snapshot", "save", &name],
            self.command_timeout,
        )?;
        Ok(name)
    }

    fn restore_snapshot(&self, path: &Path, snapshot_id: &str) -> Result<(), BackendError> {
        self.run(
            Some(path),
            &["snapshot", "restore", "--no-start", snapshot_id],
            self.boot_timeout,
        )?;
        Ok(())
    }

    fn halt(&self, path: &Path) -> Result<(), BackendError> {
        self.run(Some(path), &["halt"], self.command_timeout)?;
        Ok(())
    }

    fn destroy(&self, path: &Path) -> Result<(), BackendError> {
        self.run(Some(path), &["destroy", "--force"], self.command_timeout)?;
        Ok(())
    }
}

/// Snapshot name: `{sanitized-label}-baseline-{unix seconds}`
fn snapshot_name(label: &str, timestamp: i64) -> String {
    let mut sanitized = String::new();
    let mut last_was_dash = false;

    for c in label.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            sanitized.push('-');
            last_was_dash = true;
        }
    }

    let sanitized = sanitized.trim_matches('-');
    let sanitized = if sanitized.is_empty() { "machine" } else { sanitized };

    format!("{}-baseline-{}", sanitized, timestamp)
}

use crate::cli::ConfigCommands;
use crate::config::Configuration;
use crate::error::Result;
use crate::utils::size::format_memory;
use std::path::Path;

pub fn execute(command: &ConfigCommands, path: &Path) -> Result<()> {
    match command {
        ConfigCommands::Validate => validate(path),
        ConfigCommands::Show => show(path),
    }
}

fn validate(path: &Path) -> Result<()> {
    println!("Validating {}...", path.display());

    match Configuration::load(path) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!("  Boxes: {}", config.boxes.len());
            println!("  Labels: {}", config.catalog()?.labels().join(", "));
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration is invalid!");
            println!("  Error: {}", e);
            Err(e)
        }
    }
}

fn show(path: &Path) -> Result<()> {
    let config = Configuration::load(path)?;

    println!("Effective Configuration:");
    println!("(Environment > {} > Defaults)\n", path.display());

    println!("Jenkins:");
    println!("  url: {}", config.jenkins_api_url);
    println!("  secret: {}", mask(&config.jenkins_api_secret));
    println!("  timeout: {}s", config.jenkins_timeout_secs);

    println!("\nServer:");
    println!("  listener_port: {}", config.listener_port);
    println!("  max_vm_count: {}", config.max_vm_count);
    println!("  log_json: {}", config.log_json);

    println!("\nStorage:");
    println!("  working_dir_path: {}", config.working_dir_path.display());
    println!("  database_path: {}", config.database_path().display());

    println!("\nVagrant:");
    println!("  binary: {}", config.vagrant.binary);
    println!("  command_timeout: {}s", config.vagrant.command_timeout_secs);
    println!("  boot_timeout: {}s", config.vagrant.boot_timeout_secs);

    let catalog = config.catalog()?;
    if !catalog.boxes().is_empty() {
        println!("\nBoxes:");
        for definition in catalog.boxes() {
            let labels: Vec<&str> = definition.labels.iter().map(String::as_str).collect();
            println!(
                "  - {} ({}) -> {}",
                definition.name,
                format_memory(definition.memory_bytes),
                labels.join(", ")
            );
        }
    }

    Ok(())
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "********"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_secret() {
        assert_eq!(mask(""), "(not set)");
        assert_eq!(mask("s3cret"), "********");
    }

    #[test]
    fn test_config_module_exports() {
        let _execute_fn: fn(&ConfigCommands, &Path) -> Result<()> = execute;
    }
}

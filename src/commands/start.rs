use super::helpers;
use crate::config::Configuration;
use crate::error::Result;

pub fn execute(config: &Configuration, label: &str) -> Result<()> {
    let controller = helpers::build_controller(config)?;
    let machine = controller.start_agent(label)?;

    println!("Started {} ({})", machine.id, machine.label);
    println!("  Name:  {}", machine.name);
    println!("  State: {}", machine.state);
    if let Some(snapshot) = &machine.snapshot_id {
        println!("  Snapshot: {}", snapshot);
    }
    Ok(())
}

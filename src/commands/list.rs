use super::helpers;
use crate::config::Configuration;
use crate::error::{AgentManagerError, Result};
use crate::machine::{Machine, MachineState};
use crate::registry::MachineRegistry;

pub fn execute(config: &Configuration, state: Option<MachineState>) -> Result<()> {
    let registry = helpers::open_registry(config)?;
    let machines = registry
        .list()
        .map_err(|e| AgentManagerError::persistence("list machines", e))?;

    let machines = filter(machines, state);
    if machines.is_empty() {
        println!("No machines found.");
        return Ok(());
    }

    println!(
        "{:<32}  {:<24}  {:<16}  {:<10}  {:<20}",
        "ID", "NAME", "LABEL", "STATE", "MODIFIED"
    );
    println!("{}", "-".repeat(110));
    for machine in machines {
        println!(
            "{:<32}  {:<24}  {:<16}  {:<10}  {:<20}",
            machine.id,
            machine.name,
            machine.label,
            machine.state,
            machine.modified_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn filter(machines: Vec<Machine>, state: Option<MachineState>) -> Vec<Machine> {
    match state {
        Some(state) => machines.into_iter().filter(|m| m.state == state).collect(),
        None => machines,
    }
}

use super::helpers;
use crate::config::Configuration;
use crate::error::Result;

pub fn execute(config: &Configuration, id: &str) -> Result<()> {
    let controller = helpers::build_controller(config)?;
    let machine = controller.stop_agent(id)?;

    println!("Stopped {} ({}): now {}", machine.id, machine.label, machine.state);
    Ok(())
}

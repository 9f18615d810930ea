use super::helpers;
use crate::config::Configuration;
use crate::error::Result;

pub fn execute(config: &Configuration, id: &str) -> Result<()> {
    let controller = helpers::build_controller(config)?;
    let machine = controller.delete_machine(id)?;

    println!("Deleted {} ({})", machine.id, machine.label);
    Ok(())
}

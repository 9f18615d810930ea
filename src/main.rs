#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;

use jenkins_agent_manager::cli::{Cli, Commands};
use jenkins_agent_manager::commands;
use jenkins_agent_manager::config::Configuration;
use jenkins_agent_manager::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config commands report on the file themselves, valid or not
    if let Some(Commands::Config { command }) = &cli.command {
        logging::init(cli.verbose, false);
        commands::config::execute(command, &cli.config)?;
        return Ok(());
    }

    let config = Configuration::load(&cli.config)?;
    logging::init(cli.verbose, config.log_json);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::serve::execute(&config)?,
        Commands::List { state } => commands::list::execute(&config, state)?,
        Commands::Start { label } => commands::start::execute(&config, &label)?,
        Commands::Stop { id } => commands::stop::execute(&config, &id)?,
        Commands::Delete { id } => commands::delete::execute(&config, &id)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}

use crate::config::DEFAULT_CONFIG_PATH;
use crate::machine::MachineState;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate the configuration file
    Validate,

    /// Show effective configuration after applying environment overrides
    Show,
}

#[derive(Parser, Debug)]
#[command(name = "jenkins-agent-manager")]
#[command(about = "Provision disposable Jenkins build agents as Vagrant VMs", long_about = None)]
#[command(version = env!("AGENT_MANAGER_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (JSON, or TOML when ending in .toml)
    #[arg(
        short = 'c',
        long = "config",
        env = "AGENT_MANAGER_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    pub config: PathBuf,

    /// Show debug logs
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// List machines known to the registry
    List {
        /// Only show machines in this state
        #[arg(long, value_parser = parse_state)]
        state: Option<MachineState>,
    },

    /// Start a build agent for a label
    Start {
        /// Jenkins label to provision for
        label: String,
    },

    /// Stop a running build agent
    Stop {
        /// Machine id
        id: String,
    },

    /// Delete an idle or destroyed machine
    #[command(alias = "rm")]
    Delete {
        /// Machine id
        id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn parse_state(value: &str) -> Result<MachineState, String> {
    MachineState::parse(value).ok_or_else(|| {
        format!(
            "unknown state '{}' (expected creating, running, unused or destroyed)",
            value
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_no_command() {
        let cli = Cli::try_parse_from(["jenkins-agent-manager"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_list_state_filter() {
        let cli =
            Cli::try_parse_from(["jenkins-agent-manager", "list", "--state", "unused"]).unwrap();
        match cli.command {
            Some(Commands::List { state }) => assert_eq!(state, Some(MachineState::Unused)),
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(
            Cli::try_parse_from(["jenkins-agent-manager", "list", "--state", "halted"]).is_err()
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "jenkins-agent-manager",
            "start",
            "windows",
            "-v",
            "--config",
            "/tmp/agents.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/tmp/agents.json"));
        assert!(matches!(cli.command, Some(Commands::Start { ref label }) if label == "windows"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the pairing server (`serve`)
//! - Managing trusted devices (`devices list`, `devices revoke`, `devices revoke-all`)

mod devices;

pub use devices::{DevicesCommand, run_devices_command};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hostpair")]
#[command(about = "Pair trusted LAN remotes with this machine and manage their credentials")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pairing server (default if no subcommand given)
    Serve {
        /// Print a pairing link on startup
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        initial_pairing: bool,
    },

    /// Manage trusted devices
    #[command(subcommand)]
    Devices(DevicesCommand),
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_device_commands() {
        let cli = Cli::try_parse_from(["hostpair", "devices", "revoke", "abc"]).unwrap();
        match cli.command {
            Some(Command::Devices(DevicesCommand::Revoke { device_id })) => {
                assert_eq!(device_id, "abc")
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["hostpair", "devices", "revoke-all", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Devices(DevicesCommand::RevokeAll { force: true }))
        ));
    }

    #[test]
    fn test_serve_is_optional() {
        let cli = Cli::try_parse_from(["hostpair"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["hostpair", "serve", "--initial-pairing", "false"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Serve {
                initial_pairing: false
            })
        ));
    }
}

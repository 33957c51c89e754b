//! vctrl - run a single vcontrold command from the shell.
//!
//! ```text
//! vctrl get <command>
//! vctrl set <command> [args...]
//! ```
//!
//! Host, port and timeout come from `ClientConfig::load()`; `--host` and
//! `--port` override them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vctrld_client::config::ClientConfig;
use vctrld_client::vcontrol::{SetArgs, VControlClient};

#[derive(Debug, Parser)]
#[command(
    name = "vctrl",
    about = "Run a single command against a vcontrold daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Daemon host, overriding the configuration.
    #[arg(long)]
    host: Option<String>,

    /// Daemon port, overriding the configuration.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Read a value, e.g. `vctrl get getTempA`.
    Get {
        /// vcontrold get command.
        command: String,
    },

    /// Write a value, e.g. `vctrl set setBetriebsart WW`.
    Set {
        /// vcontrold set command.
        command: String,
        /// Arguments, joined with spaces on the wire.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

async fn run(command: Command, config: &ClientConfig) -> Result<String> {
    let client = VControlClient::with_config(config);
    client
        .connect(&config.host, config.port)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;

    let result = match command {
        Command::Get { command } => client.get_data(&command).await,
        Command::Set { command, args } => client.set_data(&command, SetArgs::from(args)).await,
    };

    // Close even when the command failed; report the command error first.
    let closed = client.close().await;
    let payload = result?;
    closed.context("Failed to close connection")?;

    Ok(payload)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr keeps stdout for the payload)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vctrld_client=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    tracing::debug!("Using vcontrold at {}:{}", config.host, config.port);

    let payload = run(cli.command, &config).await?;
    println!("{}", payload.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from(["vctrl", "get", "getTempA"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Get {
                command: "getTempA".to_string()
            }
        );
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn test_parse_set_with_args() {
        let cli = Cli::try_parse_from(["vctrl", "set", "setMode", "eco", "fast"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Set {
                command: "setMode".to_string(),
                args: vec!["eco".to_string(), "fast".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_set_without_args() {
        let cli = Cli::try_parse_from(["vctrl", "set", "setPump"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Set {
                command: "setPump".to_string(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_set_negative_value() {
        let cli = Cli::try_parse_from(["vctrl", "set", "setOffset", "-2"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Set {
                command: "setOffset".to_string(),
                args: vec!["-2".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_host_and_port() {
        let cli = Cli::try_parse_from([
            "vctrl",
            "--host",
            "heating.local",
            "--port",
            "4000",
            "get",
            "getTempA",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("heating.local"));
        assert_eq!(cli.port, Some(4000));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Cli::try_parse_from(["vctrl"]).is_err());
        assert!(Cli::try_parse_from(["vctrl", "get"]).is_err());
        assert!(Cli::try_parse_from(["vctrl", "get", "getTempA", "extra"]).is_err());
        assert!(Cli::try_parse_from(["vctrl", "delete", "x"]).is_err());
        assert!(Cli::try_parse_from(["vctrl", "--port", "not-a-port", "get", "x"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

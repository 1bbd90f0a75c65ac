pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing subscriber for the CLI.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[derive(Parser)]
#[command(name = "clientinst")]
#[command(about = "Send batched client instrumentation events to a logging endpoint")]
#[command(version)]
pub struct Cli {
    /// Path to config file (defaults to .clientinst.toml, then the user config directory)
    #[arg(long, global = true, env = "CLIENTINST_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a config file
    Init(InitArgs),
    /// Log a single event and flush it
    Send(SendArgs),
    /// Replay events from an NDJSON file through the batcher
    Replay(ReplayArgs),
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Logging endpoint URL containing the default route key
    #[arg(long)]
    pub log_url: String,

    /// Default route key (impression group) embedded in the log URL
    #[arg(long)]
    pub route: String,

    /// Enable the beacon transport tier
    #[arg(long)]
    pub beacon: bool,

    /// Partial impression endpoint
    #[arg(long)]
    pub xls_url: Option<String>,

    /// Output path
    #[arg(long, default_value = config::CONFIG_FILENAME)]
    pub output: String,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct SendArgs {
    /// Event type (sent as CI.<type>)
    #[arg(long = "type", short = 't')]
    pub event_type: String,

    /// Event name
    #[arg(long)]
    pub name: Option<String>,

    /// Feature id
    #[arg(long)]
    pub fid: Option<String>,

    /// Route key overriding the default impression group
    #[arg(long)]
    pub route: Option<String>,

    /// Event field as KEY=VALUE (repeatable)
    #[arg(long = "field", short = 'f', value_parser = parse_field)]
    pub fields: Vec<(String, String)>,
}

#[derive(clap::Args)]
pub struct ReplayArgs {
    /// NDJSON file, one event per line
    pub file: String,

    /// Override the flush interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid field '{}', expected KEY=VALUE", s))?;
    if key.is_empty() {
        return Err(format!("invalid field '{}', empty key", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_splits_on_first_equals() {
        assert_eq!(
            parse_field("K=a=b").unwrap(),
            ("K".to_string(), "a=b".to_string())
        );
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=v").is_err());
    }

    #[test]
    fn cli_parses_send() {
        let cli = Cli::parse_from([
            "clientinst", "send", "-t", "Click", "--route", "g1", "-f", "K=v1", "-f", "Pos=2",
        ]);
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.event_type, "Click");
                assert_eq!(args.route.as_deref(), Some("g1"));
                assert_eq!(args.fields.len(), 2);
            }
            _ => panic!("expected send"),
        }
    }
}

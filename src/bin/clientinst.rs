use anyhow::Context;
use clap::Parser;
use clientinst::cli::{commands, config, init_tracing, Cli, Commands};

/// Load config from an explicit path or the default locations
fn require_config(path: Option<&str>) -> anyhow::Result<config::Config> {
    match path {
        Some(path) => config::load_config_from_path(path),
        None => config::Config::load().with_context(|| {
            format!(
                "No {} found. Run 'clientinst init' first, or pass --config.",
                config::CONFIG_FILENAME
            )
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => commands::execute_init(args)?,
        Commands::Send(args) => {
            let cfg = require_config(cli.config.as_deref())?;
            commands::execute_send(&cfg, args).await?
        }
        Commands::Replay(args) => {
            let cfg = require_config(cli.config.as_deref())?;
            commands::execute_replay(&cfg, args).await?
        }
    }

    Ok(())
}

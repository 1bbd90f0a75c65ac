use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::config::Config;
use crate::cli::InitArgs;

pub fn execute_init(args: InitArgs) -> Result<()> {
    if Path::new(&args.output).exists() && !args.force {
        bail!("{} already exists. Use --force to overwrite.", args.output);
    }

    let mut config = Config::new(args.log_url, args.route);
    config.beacon_enabled = args.beacon;
    config.xls_url = args.xls_url;
    config.validate()?;
    config.save(&args.output)?;

    eprintln!("Created {}", args.output);
    eprintln!("  log_url: {}", config.log_url);
    eprintln!("  default_route: {}", config.default_route);
    eprintln!("  beacon: {}", config.beacon_enabled);
    if let Some(ref url) = config.xls_url {
        eprintln!("  xls_url: {}", url);
    }

    Ok(())
}

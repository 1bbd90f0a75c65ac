mod init;
mod replay;
mod send;

pub use init::execute_init;
pub use replay::{execute_replay, ReplayEvent};
pub use send::execute_send;

use anyhow::{anyhow, Result};

use crate::batcher::Batcher;
use crate::cli::config::Config;
use crate::transport::http_chain;

/// Build an HTTP-backed batcher that tears down on Ctrl+C.
pub(crate) fn build_batcher(config: &Config) -> Result<Batcher> {
    let chain = http_chain(&config.http_settings()).map_err(|e| anyhow!(e))?;
    let batcher = Batcher::builder(config.batcher_settings(), chain)
        .unload_signal(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .build();
    Ok(batcher)
}

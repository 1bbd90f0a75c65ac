use anyhow::Result;

use crate::cli::commands::build_batcher;
use crate::cli::config::Config;
use crate::cli::SendArgs;
use crate::event::LogRequest;

pub async fn execute_send(config: &Config, args: SendArgs) -> Result<()> {
    let batcher = build_batcher(config)?;

    let mut request = LogRequest::new(args.event_type).fields(args.fields);
    if let Some(name) = args.name {
        request = request.name(name);
    }
    if let Some(fid) = args.fid {
        request = match fid.parse::<i64>() {
            Ok(k) => request.feature_id(k),
            Err(_) => request.feature_id(fid),
        };
    }
    if let Some(route) = args.route {
        request = request.impression_guid(route);
    }
    batcher.submit(request);

    let report = batcher.teardown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        anyhow::bail!("{} route(s) failed to send", report.failed.len());
    }
    Ok(())
}

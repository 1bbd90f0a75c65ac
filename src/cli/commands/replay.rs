use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::commands::build_batcher;
use crate::cli::config::Config;
use crate::cli::ReplayArgs;
use crate::event::{FieldValue, LogRequest};

/// One line of a replay file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fid: Option<JsonValue>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
    #[serde(default)]
    pub immediate: bool,
    /// Pause before logging this event
    #[serde(default)]
    pub delay_ms: u64,
}

impl ReplayEvent {
    pub fn to_request(&self) -> LogRequest {
        let mut request = LogRequest::new(self.event_type.clone());
        if let Some(name) = &self.name {
            request = request.name(name.clone());
        }
        match &self.fid {
            Some(JsonValue::Number(n)) if n.is_i64() => {
                request = request.feature_id(n.as_i64().unwrap_or_default());
            }
            Some(JsonValue::String(s)) => request = request.feature_id(s.clone()),
            Some(JsonValue::Null) | None => {}
            Some(other) => request = request.feature_id(other.to_string()),
        }
        for (key, value) in &self.fields {
            request = request.field(key.clone(), field_value(value));
        }
        if let Some(route) = &self.route {
            request = request.impression_guid(route.clone());
        }
        if self.immediate {
            request = request.immediate();
        }
        request
    }
}

fn field_value(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::String(s) => FieldValue::Text(s.clone()),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        other => FieldValue::Text(other.to_string()),
    }
}

pub fn parse_replay(content: &str) -> Result<Vec<ReplayEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", idx + 1))
        })
        .collect()
}

pub async fn execute_replay(config: &Config, args: ReplayArgs) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file))?;
    let events = parse_replay(&content)?;

    let mut config = config.clone();
    if let Some(interval_ms) = args.interval_ms {
        config.flush_interval_ms = interval_ms;
    }
    config.validate()?;
    let batcher = build_batcher(&config)?;

    info!(events = events.len(), file = %args.file, "replaying events");
    for event in &events {
        if event.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(event.delay_ms)).await;
        }
        if batcher.is_torn_down() {
            warn!("interrupted, remaining events skipped");
            break;
        }
        batcher.submit(event.to_request());
    }

    let report = batcher.teardown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

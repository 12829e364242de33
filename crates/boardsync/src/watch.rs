//! The `watch` command: one board session driven from stdin.

use std::sync::Arc;
use std::time::Duration;

use boardsync_core::{
    BoardSession, EditableState, EditingSurface, FlushOutcome, MemorySurface,
    SessionCollaborators, SessionConfig, SurfaceEdit, SyncError, SyncEvent, SyncEventHandler,
    TeardownReport,
};
use boardsync_native::{
    HttpApi, RealtimeConnector, ReconnectConfig, UreqTeardown, parse_base_url,
    termination_signal, websocket_url,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;

/// How long to wait for beacons still in flight before exiting.
const BEACON_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("failed to read {what}: {source}")]
    Io {
        what: &'static str,
        source: std::io::Error,
    },
}

/// One line of stdin.
#[derive(Debug, PartialEq)]
enum Input {
    Edit(SurfaceEdit),
    Flush,
}

fn parse_input(line: &str) -> Result<Option<Input>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line == ":flush" {
        return Ok(Some(Input::Flush));
    }
    let value: Value = serde_json::from_str(line)?;
    if value.get("op").and_then(Value::as_str) == Some("flush") {
        return Ok(Some(Input::Flush));
    }
    Ok(Some(Input::Edit(serde_json::from_value(value)?)))
}

fn event_printer(surface: Arc<MemorySurface>) -> Arc<dyn SyncEventHandler> {
    Arc::new(move |event: SyncEvent| match &event {
        SyncEvent::RemoteApplied { author, changed } => {
            info!("Applied snapshot from {} ({} records changed)", author, changed);
            match surface.snapshot().to_json_string() {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Could not print board: {}", e),
            }
        }
        SyncEvent::Persisted { trigger, records, .. } => {
            info!("Persisted {} records ({:?})", records, trigger);
        }
        SyncEvent::PersistFailed { trigger, message } => {
            warn!("Persist failed ({:?}): {}", trigger, message);
        }
        SyncEvent::Error { message } => warn!("{}", message),
        SyncEvent::StatusChanged { status } => info!("Channel {:?}", status),
        SyncEvent::ProvisionChanged { state } => debug!("Provisioning: {:?}", state),
    })
}

fn load_initial(config: &Config) -> Result<Option<EditableState>, WatchError> {
    let Some(path) = &config.initial else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path).map_err(|source| WatchError::Io {
        what: "initial board",
        source,
    })?;
    Ok(Some(EditableState::from_json(&text)?))
}

pub async fn run(config: Config) -> Result<TeardownReport, WatchError> {
    let api_base = parse_base_url(&config.api_url)?;
    let realtime_url = websocket_url(&config.realtime_url)?;

    let surface = Arc::new(MemorySurface::new());
    let mut session_config = SessionConfig::new(&config.board_id, &config.user_id)
        .with_timing(config.timing);
    if let Some(state) = load_initial(&config)? {
        info!("Loaded {} records", state.record_count());
        surface.load(state.clone());
        session_config = session_config.with_initial_state(state);
    }
    let changes = surface.subscribe();

    let api = Arc::new(HttpApi::new(api_base.clone(), config.auth_token.clone()));
    let teardown = UreqTeardown::new(api_base, config.auth_token.clone());
    let reconnect = ReconnectConfig {
        max_attempts: config.reconnect_attempts,
        ..ReconnectConfig::default()
    };

    let collaborators = SessionCollaborators {
        surface: surface.clone(),
        persistence: api.clone(),
        teardown: Arc::new(teardown.clone()),
        tokens: api,
        connector: Arc::new(RealtimeConnector::new(realtime_url, reconnect)),
        events: Some(event_printer(surface.clone())),
    };

    info!("Watching board {} as {}", config.board_id, config.user_id);
    let handle = BoardSession::start_with_termination(
        session_config,
        collaborators,
        changes,
        termination_signal(),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stopped_by_signal = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break false,
                    Err(source) => {
                        warn!("stdin closed: {}", source);
                        break false;
                    }
                };
                match parse_input(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Edit(edit))) => {
                        surface.apply(edit);
                    }
                    Ok(Some(Input::Flush)) => match handle.flush().await {
                        Ok(FlushOutcome::NothingPending) => info!("Nothing to flush"),
                        Ok(outcome) => info!("Flush: {:?}", outcome),
                        Err(e) => warn!("Flush failed: {}", e),
                    },
                    Err(e) => warn!("Ignoring line: {}", e),
                }
            }
            _ = handle.closed() => break true,
        }
    };

    let report = if stopped_by_signal {
        handle.wait().await?
    } else {
        handle.unmount().await?
    };

    let remaining = tokio::task::spawn_blocking(move || teardown.drain(BEACON_DRAIN_TIMEOUT))
        .await
        .unwrap_or(0);
    if remaining > 0 {
        warn!("{} teardown requests still in flight at exit", remaining);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_edits() {
        assert_eq!(
            parse_input(r#"{"op":"put","id":"s1","record":{"x":1}}"#).unwrap(),
            Some(Input::Edit(SurfaceEdit::Put {
                id: "s1".into(),
                record: json!({"x": 1}),
            }))
        );
        assert_eq!(
            parse_input(r#"{"op":"cursor","x":1.5,"y":2}"#).unwrap(),
            Some(Input::Edit(SurfaceEdit::Cursor { x: 1.5, y: 2.0 }))
        );
    }

    #[test]
    fn test_parse_flush_forms() {
        assert_eq!(parse_input(":flush").unwrap(), Some(Input::Flush));
        assert_eq!(parse_input(r#"{"op":"flush"}"#).unwrap(), Some(Input::Flush));
    }

    #[test]
    fn test_blank_and_bad_lines() {
        assert_eq!(parse_input("   ").unwrap(), None);
        assert!(parse_input("{not json").is_err());
        assert!(parse_input(r#"{"op":"explode"}"#).is_err());
    }
}

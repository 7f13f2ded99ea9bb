//! # Engine log tailing.
//!
//! The engine writes one JSON object per line to `logstash.log`. Two categories are
//! turned into readiness signals; everything else is ignored so that changes in the
//! engine's own log vocabulary never break supervision.
//!
//! ```text
//! {"loggerName":"logstash.javapipeline","logEvent":{"message":"Pipeline started","pipeline.id":"main"}}
//!     → PipelineStarted("main")
//! {"loggerName":"logstash.agent","logEvent":{"message":"Pipelines running","running_pipelines":["main"]}}
//!     → PipelinesRunning(["main"])
//! ```

use std::path::PathBuf;
use std::sync::Weak;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::instance::{InstanceCallbacks, with_callbacks};
use crate::engine::tracker::PIPELINES_RUNNING;

const PIPELINE_STARTED: &str = "Pipeline started";
const PIPELINES_RUNNING_MESSAGE: &str = "Pipelines running";

/// Readiness signal extracted from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSignal {
    PipelineStarted(String),
    PipelinesRunning(Vec<String>),
}

impl LogSignal {
    /// Names to mark ready, including the sentinel for `PipelinesRunning`.
    pub fn ready_names(self) -> Vec<String> {
        match self {
            LogSignal::PipelineStarted(id) => vec![id],
            LogSignal::PipelinesRunning(mut running) => {
                running.push(PIPELINES_RUNNING.to_string());
                running
            }
        }
    }
}

#[derive(Deserialize)]
struct LogLine {
    #[serde(rename = "logEvent")]
    log_event: Option<LogEvent>,
}

#[derive(Deserialize)]
struct LogEvent {
    message: Option<String>,
    #[serde(rename = "pipeline.id")]
    pipeline_id: Option<String>,
    running_pipelines: Option<Value>,
}

/// Parses one log line; `None` for anything that is not a readiness signal.
pub fn parse_line(line: &str) -> Option<LogSignal> {
    let line: LogLine = serde_json::from_str(line.trim()).ok()?;
    let event = line.log_event?;
    match event.message.as_deref()? {
        PIPELINE_STARTED => event.pipeline_id.map(LogSignal::PipelineStarted),
        PIPELINES_RUNNING_MESSAGE => Some(LogSignal::PipelinesRunning(
            event
                .running_pipelines
                .as_ref()
                .map(pipeline_names)
                .unwrap_or_default(),
        )),
        _ => None,
    }
}

/// Accepts both a JSON array and the engine's inspected form `[:main, :"other"]`.
fn pipeline_names(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim_start_matches(':').to_string())
            .collect(),
        Value::String(s) => s
            .trim_matches(|c| c == '[' || c == ']')
            .split(',')
            .map(|s| s.trim().trim_start_matches(':').trim_matches('"'))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Follows `path` from the beginning until `token` is cancelled, forwarding readiness
/// signals to `callbacks`. Waits for the file to appear.
pub async fn follow(
    path: PathBuf,
    poll: Duration,
    token: CancellationToken,
    callbacks: Weak<dyn InstanceCallbacks>,
) {
    let poll = poll.max(Duration::from_millis(1));
    let file = loop {
        match File::open(&path).await {
            Ok(file) => break file,
            Err(_) => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = time::sleep(poll) => {}
                }
            }
        }
    };
    debug!(path = %path.display(), "tailing engine log");

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = time::sleep(poll) => {}
                }
            }
            Ok(_) if buf.last() != Some(&b'\n') => {
                // Partial line: keep the buffer and continue after the writer catches up.
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                trace!(line = line.trim_end(), "engine log");
                if let Some(signal) = parse_line(&line) {
                    let names = signal.ready_names();
                    with_callbacks(&callbacks, |cb| cb.pipelines_ready(names));
                }
                buf.clear();
            }
            Err(err) => {
                warn!(?err, path = %path.display(), "engine log read failed");
                buf.clear();
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = time::sleep(poll) => {}
                }
            }
        }
    }
}

//! # Pipeline definitions as written to the engine's `pipelines.yml`.
//!
//! ```yaml
//! - pipeline.id: main
//!   path.config: /tmp/pipevisor-x/session/0b8e.../sut/main.conf
//!   pipeline.workers: 1
//!   pipeline.ordered: "true"
//! ```

use serde::{Deserialize, Serialize};

/// One named pipeline entry of `pipelines.yml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique pipeline id.
    #[serde(rename = "pipeline.id")]
    pub id: String,

    /// Config path or glob (absolute once written for the engine).
    #[serde(rename = "path.config")]
    pub config: String,

    #[serde(
        rename = "pipeline.workers",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workers: Option<u32>,

    /// Engine accepts `"true"`, `"false"` or `"auto"`.
    #[serde(
        rename = "pipeline.ordered",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ordered: Option<String>,
}

impl Pipeline {
    /// Creates an entry with engine defaults for workers and ordering.
    pub fn new(id: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: config.into(),
            workers: None,
            ordered: None,
        }
    }

    /// Pins the pipeline to a single ordered worker.
    pub fn single_ordered(mut self) -> Self {
        self.workers = Some(1);
        self.ordered = Some("true".to_string());
        self
    }
}

/// Decodes a `pipelines.yml` manifest.
pub fn parse_manifest(text: &str) -> Result<Vec<Pipeline>, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(text)
}

/// Encodes pipelines as a `pipelines.yml` document.
pub fn render_manifest(pipelines: &[Pipeline]) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(pipelines)
}

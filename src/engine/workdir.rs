//! # Engine working directory.
//!
//! Every controller owns one directory used as the engine's settings and log path:
//!
//! ```text
//! <root>/
//!   logstash.yml          engine settings (automatic reload off; reload is signal-driven)
//!   log4j2.properties     JSON log layout → logstash.log (tailed for readiness)
//!   stdin.conf            bootstrap: blocks on stdin so the engine never runs dry
//!   output.conf           bootstrap: __lfv_output → stdout as JSON lines
//!   pipelines.yml         bootstrap pipelines + the current test cycle's pipelines
//!   logstash.log          written by the engine
//!   data/                 engine data path
//! ```

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::ControllerError;
use crate::pipeline::{Pipeline, render_manifest};

/// Pipeline id of the stdin blocker.
pub const STDIN_PIPELINE: &str = "stdin";
/// Pipeline id of the output forwarder.
pub const OUTPUT_PIPELINE: &str = "output";
/// Internal address every test output is forwarded to.
pub const OUTPUT_ADDRESS: &str = "__lfv_output";

const SETTINGS_FILE: &str = "logstash.yml";
const LOG_CONFIG_FILE: &str = "log4j2.properties";
const PIPELINES_FILE: &str = "pipelines.yml";
const LOG_FILE: &str = "logstash.log";

const SETTINGS: &str = "\
config.reload.automatic: false
config.support_escapes: true
pipeline.separate_logs: false
";

const LOG_CONFIG: &str = "\
status = error
name = PipevisorLogConfig

appender.json_file.type = File
appender.json_file.name = json_file
appender.json_file.fileName = ${sys:ls.logs}/logstash.log
appender.json_file.layout.type = JSONLayout
appender.json_file.layout.compact = true
appender.json_file.layout.eventEol = true

rootLogger.level = ${sys:ls.log.level}
rootLogger.appenderRef.json_file.ref = json_file
";

const STDIN_CONFIG: &str = "\
input { stdin { } }
filter { drop { } }
output { stdout { } }
";

fn output_config() -> String {
    format!(
        "input {{ pipeline {{ address => \"{OUTPUT_ADDRESS}\" }} }}\n\
         output {{ stdout {{ codec => json_lines }} }}\n"
    )
}

/// Layout of one engine working directory.
#[derive(Clone, Debug)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipelines_file(&self) -> PathBuf {
        self.root.join(PIPELINES_FILE)
    }

    /// Engine log file tailed for readiness signals.
    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// The two pipelines present in every configuration.
    pub fn bootstrap_pipelines(&self) -> Vec<Pipeline> {
        vec![
            Pipeline::new(STDIN_PIPELINE, self.path_string("stdin.conf")),
            Pipeline::new(OUTPUT_PIPELINE, self.path_string("output.conf")),
        ]
    }

    /// Creates the directory with settings, log config, bootstrap pipeline files
    /// and a bootstrap-only `pipelines.yml`.
    pub async fn prepare(&self) -> Result<(), ControllerError> {
        fs::create_dir_all(self.data_dir())
            .await
            .map_err(|e| ControllerError::io("failed to create", self.data_dir(), e))?;

        self.write(SETTINGS_FILE, SETTINGS).await?;
        self.write(LOG_CONFIG_FILE, LOG_CONFIG).await?;
        self.write("stdin.conf", STDIN_CONFIG).await?;
        self.write("output.conf", &output_config()).await?;
        self.write_pipelines(&[]).await?;
        Ok(())
    }

    /// Replaces `pipelines.yml` with the bootstrap pipelines followed by `extra`.
    ///
    /// Written to a temporary file and renamed so a reload never reads a partial file.
    /// Returns everything that was written.
    pub async fn write_pipelines(
        &self,
        extra: &[Pipeline],
    ) -> Result<Vec<Pipeline>, ControllerError> {
        let mut pipelines = self.bootstrap_pipelines();
        pipelines.extend_from_slice(extra);
        let text = render_manifest(&pipelines)?;

        let tmp = self.root.join(".pipelines.yml.tmp");
        fs::write(&tmp, text)
            .await
            .map_err(|e| ControllerError::io("failed to write", &tmp, e))?;
        fs::rename(&tmp, self.pipelines_file())
            .await
            .map_err(|e| ControllerError::io("failed to replace", self.pipelines_file(), e))?;
        Ok(pipelines)
    }

    async fn write(&self, name: &str, contents: &str) -> Result<(), ControllerError> {
        let path = self.root.join(name);
        fs::write(&path, contents)
            .await
            .map_err(|e| ControllerError::io("failed to write", path, e))
    }

    fn path_string(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse_manifest;

    #[tokio::test]
    async fn test_prepare_writes_bootstrap_layout() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::new(dir.path().join("instance"));
        workdir.prepare().await.unwrap();

        for name in ["logstash.yml", "log4j2.properties", "stdin.conf", "output.conf"] {
            assert!(workdir.root().join(name).is_file(), "{name} missing");
        }
        assert!(workdir.data_dir().is_dir());

        let output = std::fs::read_to_string(workdir.root().join("output.conf")).unwrap();
        assert!(output.contains(OUTPUT_ADDRESS));
        assert!(output.contains("json_lines"));

        let text = std::fs::read_to_string(workdir.pipelines_file()).unwrap();
        let ids: Vec<String> = parse_manifest(&text).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![STDIN_PIPELINE, OUTPUT_PIPELINE]);
    }

    #[tokio::test]
    async fn test_write_pipelines_keeps_bootstrap_first() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::new(dir.path());
        workdir.prepare().await.unwrap();

        let written = workdir
            .write_pipelines(&[Pipeline::new("main", "/sut/main.conf")])
            .await
            .unwrap();
        assert_eq!(written.len(), 3);

        let text = std::fs::read_to_string(workdir.pipelines_file()).unwrap();
        let ids: Vec<String> = parse_manifest(&text).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["stdin", "output", "main"]);
        assert!(!workdir.root().join(".pipelines.yml.tmp").exists());
    }
}

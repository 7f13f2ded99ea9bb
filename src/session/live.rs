//! # Session: one client's exclusive use of a leased controller.
//!
//! ## Layout
//! ```text
//! <sessions>/<id>/
//!   sut/<files>                 rewritten configuration; pipelines re-rooted here
//!   lfv_outputs/<output>.conf   one forwarder per distinct output → __lfv_output
//!   lfv_inputs/<n>/
//!     fields.json               line index → field overlay
//!     input.conf                generator with the input lines → plugin's input address
//! ```
//!
//! `setup` prepares `sut/` and `lfv_outputs/` once; every `execute_test` adds one
//! numbered input pipeline on top of that base set for its run only.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::warn;

use crate::engine::{Controller, OUTPUT_ADDRESS};
use crate::error::SessionError;
use crate::events::{Bus, Event, EventKind};
use crate::pipeline::Pipeline;
use crate::session::rewrite::{ConfigRewriter, input_address, output_address};

/// One configuration file of a test archive, relative to the archive root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    pub body: String,
}

impl ConfigFile {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

#[derive(Default)]
struct Prepared {
    pipelines: Vec<Pipeline>,
    codecs: BTreeMap<String, String>,
}

/// A running test session.
pub struct Session {
    id: String,
    controller: Arc<Controller>,
    root: PathBuf,
    rewriter: Arc<dyn ConfigRewriter>,
    no_cleanup: bool,
    bus: Bus,
    prepared: Mutex<Prepared>,
    runs: AtomicUsize,
}

impl Session {
    pub(crate) fn new(
        id: String,
        controller: Arc<Controller>,
        root: PathBuf,
        rewriter: Arc<dyn ConfigRewriter>,
        no_cleanup: bool,
        bus: Bus,
    ) -> Self {
        Self {
            id,
            controller,
            root,
            rewriter,
            no_cleanup,
            bus,
            prepared: Mutex::new(Prepared::default()),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Session directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the rewritten configuration and loads it into the controller.
    pub(crate) async fn setup(
        &self,
        pipelines: Vec<Pipeline>,
        files: &[ConfigFile],
    ) -> Result<(), SessionError> {
        let sut = self.root.join("sut");
        let mut codecs = BTreeMap::new();
        let mut outputs = BTreeSet::new();

        for file in files {
            let rel = relative_path(&file.name)?;
            let inputs = self
                .rewriter
                .replace_inputs(&self.id, &file.body)
                .map_err(|e| rewrite_error(&file.name, e))?;
            let rewritten = self
                .rewriter
                .replace_outputs(&inputs.text)
                .map_err(|e| rewrite_error(&file.name, e))?;

            codecs.extend(inputs.codecs);
            outputs.extend(rewritten.outputs);
            write_file(&sut.join(rel), &rewritten.text).await?;
        }

        let mut base = Vec::with_capacity(pipelines.len() + outputs.len());
        for pipeline in pipelines {
            let config = path_string(&sut.join(relative_path(&pipeline.config)?));
            base.push(Pipeline { config, ..pipeline });
        }
        for output in &outputs {
            let path = self
                .root
                .join("lfv_outputs")
                .join(relative_path(&format!("{output}.conf"))?);
            write_file(&path, &output_config(output)).await?;
            base.push(Pipeline::new(output_address(output), path_string(&path)));
        }

        {
            let mut prepared = self.prepared.lock().unwrap_or_else(PoisonError::into_inner);
            prepared.pipelines = base.clone();
            prepared.codecs = codecs;
        }
        self.controller.setup_test(&base).await?;
        Ok(())
    }

    /// Feeds `lines` through input plugin `plugin` and returns the emitted events.
    ///
    /// `fields` is a JSON array of per-line field overlays (empty for none).
    pub async fn execute_test(
        &self,
        plugin: &str,
        lines: &[String],
        fields: &str,
        expected: usize,
    ) -> Result<Vec<String>, SessionError> {
        let (codec, mut pipelines) = {
            let prepared = self.prepared.lock().unwrap_or_else(PoisonError::into_inner);
            let codec = prepared
                .codecs
                .get(plugin)
                .cloned()
                .ok_or_else(|| SessionError::UnknownInputPlugin {
                    plugin: plugin.to_string(),
                })?;
            (codec, prepared.pipelines.clone())
        };
        let overlays = parse_fields(fields)?;

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let dir = self.root.join("lfv_inputs").join(run.to_string());
        let fields_path = dir.join("fields.json");
        let input_path = dir.join("input.conf");

        write_file(&fields_path, &serde_json::to_string(&overlays)?).await?;
        write_file(
            &input_path,
            &input_config(
                &input_address(&self.id, plugin),
                lines,
                &codec,
                &fields_path,
            ),
        )
        .await?;
        pipelines.push(
            Pipeline::new(format!("lfv_input_{run}"), path_string(&input_path)).single_ordered(),
        );

        self.controller.execute_test(&pipelines, expected).await?;
        let results = self.controller.get_results().await?;

        self.bus.publish(
            Event::new(EventKind::TestExecuted)
                .with_session(self.id.as_str())
                .with_controller(self.controller.id())
                .with_count(results.len()),
        );
        Ok(results)
    }

    /// Unloads the test configuration and removes the session directory.
    ///
    /// Only the controller's teardown decides the result; cleanup failures are logged.
    pub(crate) async fn teardown(&self) -> Result<(), SessionError> {
        let result = self.controller.teardown().await.map_err(SessionError::from);
        self.cleanup().await;
        result
    }

    pub(crate) async fn cleanup(&self) {
        if self.no_cleanup {
            return;
        }
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                session = %self.id,
                path = %self.root.display(),
                %e,
                "failed to remove session directory"
            ),
        }
    }
}

fn rewrite_error(file: &str, err: crate::session::rewrite::RewriteError) -> SessionError {
    SessionError::Rewrite {
        file: file.to_string(),
        reason: err.to_string(),
    }
}

/// Accepts only plain relative paths that stay inside their base directory.
fn relative_path(name: &str) -> Result<PathBuf, SessionError> {
    let path = Path::new(name);
    let plain = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || !plain {
        return Err(SessionError::InvalidFileName(name.to_string()));
    }
    Ok(path.to_path_buf())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn write_file(path: &Path, contents: &str) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SessionError::io("failed to create", parent, e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| SessionError::io("failed to write", path, e))
}

fn parse_fields(fields: &str) -> Result<BTreeMap<usize, Map<String, Value>>, serde_json::Error> {
    if fields.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let overlays: Vec<Map<String, Value>> = serde_json::from_str(fields)?;
    Ok(overlays.into_iter().enumerate().collect())
}

/// Escapes `s` for a double-quoted config string (escape sequences enabled).
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn output_config(output: &str) -> String {
    format!(
        "input {{ pipeline {{ address => {} }} }}\n\
         output {{ pipeline {{ send_to => [{}] }} }}\n",
        quote(&output_address(output)),
        quote(OUTPUT_ADDRESS),
    )
}

fn input_config(address: &str, lines: &[String], codec: &str, fields: &Path) -> String {
    let lines: Vec<String> = lines.iter().map(|l| format!("      {}", quote(l))).collect();
    let codec = if codec.trim().is_empty() { "plain" } else { codec };
    let init = format!(
        "require 'json'; @fields = JSON.parse(File.read({})); @index = 0",
        quote(&path_string(fields))
    );
    let code = "overlay = @fields[@index.to_s]; @index += 1; overlay.each { |k, v| event.set(k, v) } if overlay";

    format!(
        "input {{\n  generator {{\n    lines => [\n{lines}\n    ]\n    count => 1\n    threads => 1\n    codec => {codec}\n  }}\n}}\n\
         filter {{\n  ruby {{\n    init => {init}\n    code => {code}\n  }}\n  mutate {{ remove_field => [\"sequence\", \"host\"] }}\n}}\n\
         output {{\n  pipeline {{ send_to => [{address}] }}\n}}\n",
        lines = lines.join(",\n"),
        init = quote(&init),
        code = quote(code),
        address = quote(address),
    )
}

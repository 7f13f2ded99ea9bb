//! # Config rewriting seam.
//!
//! Sessions never parse pipeline configuration themselves. A [`ConfigRewriter`]
//! redirects every input plugin to an internal pipeline address and every output
//! plugin to an internal output pipeline; the session only consumes the results:
//!
//! ```text
//! input  { beats { id => "in" codec => json } }     ─replace_inputs─►   input  { pipeline { address => "__lfv_input_<session>_in" } }
//!                                                                        codecs: { "in": "json" }
//! output { elasticsearch { id => "es" } }           ─replace_outputs─►  output { pipeline { send_to => ["lfv_output_es"] } }
//!                                                                        outputs: ["es"]
//! ```

use std::collections::BTreeMap;
use std::error::Error;

/// Result of [`ConfigRewriter::replace_inputs`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewrittenInputs {
    /// Rewritten configuration text.
    pub text: String,
    /// Input plugin id → codec expression of the replaced plugin.
    pub codecs: BTreeMap<String, String>,
}

/// Result of [`ConfigRewriter::replace_outputs`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewrittenOutputs {
    /// Rewritten configuration text.
    pub text: String,
    /// Ids of the replaced output plugins.
    pub outputs: Vec<String>,
}

/// Boxed error returned by rewriters.
pub type RewriteError = Box<dyn Error + Send + Sync>;

/// Redirects a configuration file's inputs and outputs through internal pipelines.
pub trait ConfigRewriter: Send + Sync + 'static {
    /// Replaces every input plugin of `text` with a pipeline input listening on
    /// [`input_address`]`(session, id)`.
    fn replace_inputs(&self, session: &str, text: &str) -> Result<RewrittenInputs, RewriteError>;

    /// Replaces every output plugin of `text` with a pipeline output sending to
    /// [`output_address`]`(id)`.
    fn replace_outputs(&self, text: &str) -> Result<RewrittenOutputs, RewriteError>;
}

/// Leaves configuration untouched and reports no plugins.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughRewriter;

impl ConfigRewriter for PassthroughRewriter {
    fn replace_inputs(&self, _session: &str, text: &str) -> Result<RewrittenInputs, RewriteError> {
        Ok(RewrittenInputs {
            text: text.to_string(),
            codecs: BTreeMap::new(),
        })
    }

    fn replace_outputs(&self, text: &str) -> Result<RewrittenOutputs, RewriteError> {
        Ok(RewrittenOutputs {
            text: text.to_string(),
            outputs: Vec::new(),
        })
    }
}

/// Internal address the input plugin `plugin` of `session` listens on.
pub fn input_address(session: &str, plugin: &str) -> String {
    format!("__lfv_input_{session}_{plugin}")
}

/// Internal address (and pipeline id) of the forwarder for output `output`.
pub fn output_address(output: &str) -> String {
    format!("lfv_output_{output}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_keeps_text() {
        let text = "input { stdin { id => \"in\" } }";
        let inputs = PassthroughRewriter.replace_inputs("s", text).unwrap();
        assert_eq!(inputs.text, text);
        assert!(inputs.codecs.is_empty());
        assert!(PassthroughRewriter.replace_outputs(text).unwrap().outputs.is_empty());
    }

    #[test]
    fn test_addresses() {
        assert_eq!(input_address("abc", "in"), "__lfv_input_abc_in");
        assert_eq!(output_address("es"), "lfv_output_es");
    }
}

//! ActionOutputHandler: captures `::set-output` lines and enforces
//! ACTION_RUN_SUMMARY failures
//!
//! Installs a line interceptor on the plan's stdout/stderr. Lines
//! matching the action command protocol with a `set-output` command
//! and a declared output name (or `ACTION_RUN_SUMMARY`) are captured
//! and suppressed from normal logging. After a successful run, an
//! ACTION_RUN_SUMMARY carrying `Error`-level entries fails the plan.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CatalystError, Result};
use crate::features::{Feature, Gate};
use crate::runner::logsink::{LineSink, LogSink};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub const ACTION_RUN_SUMMARY: &str = "ACTION_RUN_SUMMARY";

/// One plan's captured output variables, shared with the variable
/// substitution machinery
pub type CapturedOutputs = Arc<Mutex<BTreeMap<String, String>>>;

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^::([^ ]+)( (.+))?::([^\r\n]*)[\r\n]+$").expect("valid regex")
    })
}

pub struct ActionOutputHandler {
    outputs: CapturedOutputs,
    /// Declared output variable names; undeclared outputs are dropped
    filter: Vec<String>,
    suppress_output: bool,
}

impl ActionOutputHandler {
    pub fn new(outputs: CapturedOutputs, filter: Vec<String>, suppress_output: bool) -> Self {
        Self {
            outputs,
            filter,
            suppress_output,
        }
    }
}

#[async_trait]
impl Feature for ActionOutputHandler {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER ActionOutputHandler");
        let sink: LogSink = Arc::new(OutputCaptureSink {
            inner: (!self.suppress_output).then(|| plan.environment.stdout.clone()),
            outputs: Arc::clone(&self.outputs),
            filter: self.filter.clone(),
        });
        plan.environment.stdout = sink.clone();
        plan.environment.stderr = sink;
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        if let Err(err) = result {
            self.outputs.lock().unwrap().clear();
            return Err(err);
        }

        let summary = self.outputs.lock().unwrap().remove(ACTION_RUN_SUMMARY);
        if let Some(raw) = summary {
            let messages: Vec<SummaryMessage> =
                serde_json::from_str(&raw).map_err(|err| CatalystError::ActionSummaryParse {
                    details: err.to_string(),
                    raw: raw.clone(),
                })?;
            let failures: Vec<String> = messages
                .iter()
                .filter(|m| m.level == "Error")
                .map(|m| format!("[{}] {}", m.text, m.message))
                .collect();
            if !failures.is_empty() {
                return Err(CatalystError::ActionRunFailure(failures.join("\n")));
            }
        }

        let outputs = self.outputs.lock().unwrap();
        debug!("action outputs: {outputs:?}");
        if !outputs.is_empty() {
            info!("💬 OUTPUTS:");
            for (name, value) in outputs.iter() {
                info!("    {name} = {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SummaryMessage {
    #[serde(rename = "Text")]
    text: String,
    #[serde(rename = "Level")]
    level: String,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "TemplateVariables")]
    _template_variables: Option<serde_json::Value>,
}

impl Default for SummaryMessage {
    fn default() -> Self {
        Self {
            text: String::new(),
            level: String::new(),
            message: String::new(),
            _template_variables: None,
        }
    }
}

struct OutputCaptureSink {
    /// Pass-through sink for ordinary lines; `None` when output is
    /// suppressed entirely
    inner: Option<LogSink>,
    outputs: CapturedOutputs,
    filter: Vec<String>,
}

impl OutputCaptureSink {
    /// Returns true when the line was consumed as an action command
    fn try_capture(&self, line: &str) -> bool {
        let Some(captures) = command_pattern().captures(line) else {
            return false;
        };
        if &captures[1] != "set-output" {
            return false;
        }
        let mut pairs = BTreeMap::new();
        for pair in captures.get(3).map_or("", |m| m.as_str()).split(',') {
            if let Some((k, v)) = pair.split_once('=') {
                pairs.insert(k.to_string(), v.to_string());
            }
        }
        let Some(name) = pairs.get("name") else {
            return true;
        };
        if self.filter.iter().any(|f| f == name) || name == ACTION_RUN_SUMMARY {
            debug!("setting output {name} = {}", &captures[4]);
            self.outputs
                .lock()
                .unwrap()
                .insert(name.clone(), captures[4].to_string());
        }
        true
    }
}

impl LineSink for OutputCaptureSink {
    fn line(&self, line: &str) {
        if self.try_capture(line) {
            return;
        }
        if let Some(inner) = &self.inner {
            inner.line(line);
        }
    }
}

//! Action schema: the `.codecatalyst/actions/action.yml` document
//!
//! Defines an action's inputs, outputs, configuration parameters and
//! runtime (node or docker).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CatalystError, Result};

/// A loadable action definition
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ActionSpec {
    #[serde(rename = "SchemaVersion")]
    pub schema_version: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Version")]
    pub version: String,
    /// Configuration parameters the workflow can set
    #[serde(rename = "Configuration")]
    pub configuration: BTreeMap<String, Parameter>,
    #[serde(rename = "SupportedComputeType")]
    pub supported_compute_type: Option<String>,
    #[serde(rename = "Environment")]
    pub environment: Option<serde_yaml::Value>,
    #[serde(rename = "Inputs")]
    pub inputs: ActionInputs,
    #[serde(rename = "Outputs")]
    pub outputs: ActionOutputs,
    #[serde(rename = "Runs")]
    pub runs: Runs,
    /// Directory this action was loaded from
    #[serde(skip)]
    pub basedir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Parameter {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Required")]
    pub required: bool,
    #[serde(rename = "Default")]
    pub default: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    #[serde(rename = "Type")]
    pub kind: Option<ParameterType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Number,
    Boolean,
    String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ActionInputs {
    #[serde(rename = "Sources")]
    pub sources: RequiredFlag,
    #[serde(rename = "Artifacts")]
    pub artifacts: RequiredFlag,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RequiredFlag {
    #[serde(rename = "Required")]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ActionOutputs {
    #[serde(rename = "Variables")]
    pub variables: BTreeMap<String, OutputVariable>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OutputVariable {
    #[serde(rename = "Description")]
    pub description: String,
}

/// Runtime environment and entry points
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Runs {
    #[serde(rename = "Using")]
    pub using: UsingType,

    // node runtimes
    #[serde(rename = "Main")]
    pub main: String,
    #[serde(rename = "Pre")]
    pub pre: String,
    #[serde(rename = "Post")]
    pub post: String,

    // docker runtime
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Entrypoint")]
    pub entrypoint: String,
    #[serde(rename = "PreEntryPoint")]
    pub pre_entrypoint: String,
    #[serde(rename = "PostEntryPoint")]
    pub post_entrypoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum UsingType {
    #[serde(rename = "node12")]
    Node12,
    #[default]
    #[serde(rename = "node16")]
    Node16,
    #[serde(rename = "docker")]
    Docker,
}

impl UsingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node12 => "node12",
            Self::Node16 => "node16",
            Self::Docker => "docker",
        }
    }
}

/// Load an action from `<dir>/.codecatalyst/actions/action.yml`
pub fn load(action_dir: &Path) -> Result<ActionSpec> {
    let spec_path = action_dir.join(".codecatalyst/actions/action.yml");
    let raw = std::fs::read_to_string(&spec_path)?;
    let mut action: ActionSpec =
        serde_yaml::from_str(&raw).map_err(|err| CatalystError::ActionLoad {
            path: spec_path.display().to_string(),
            details: err.to_string(),
        })?;
    action.basedir = action_dir.to_path_buf();
    if action.id.is_empty() {
        action.id = action_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    action.id = action.id.replace('/', "");
    Ok(action)
}

/// Find actions recursively under the search path by probing each
/// directory for an action definition
pub fn find(search_path: &Path) -> Result<Vec<ActionSpec>> {
    let mut actions = Vec::new();
    debug!("searching path '{}' for actions", search_path.display());
    let mut it = walkdir::WalkDir::new(search_path).into_iter();
    while let Some(entry) = it.next() {
        let entry = entry.map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry
            .path()
            .join(".codecatalyst/actions/action.yml")
            .exists()
        {
            debug!("found action: {}", entry.path().display());
            match load(entry.path()) {
                Ok(action) => actions.push(action),
                Err(err) => warn!("{err}"),
            }
            it.skip_current_dir();
        }
    }
    Ok(actions)
}

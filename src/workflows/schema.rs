//! Workflow schema: the user-authored document enumerating actions
//!
//! `Actions` is an ordered mapping whose values are either a single
//! action or a group `{Actions: {name: action}}`. Fields with varying
//! YAML shapes (artifact `Files`) are modelled as small tagged sums
//! and rejected with a precise error outside that set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CatalystError, Result};

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Workflow {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "SchemaVersion")]
    pub schema_version: String,
    /// Raw ordered mapping; use [`Workflow::actions`] for typed access
    #[serde(rename = "Actions")]
    pub actions: serde_yaml::Mapping,
    #[serde(rename = "Compute")]
    pub compute: Compute,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Compute {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "SharedInstance")]
    pub shared_instance: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkflowAction {
    #[serde(rename = "Identifier")]
    pub identifier: String,
    #[serde(rename = "DependsOn")]
    pub depends_on: Vec<String>,
    #[serde(rename = "Configuration")]
    pub configuration: BTreeMap<String, serde_yaml::Value>,
    #[serde(rename = "Inputs")]
    pub inputs: ActionInputs,
    #[serde(rename = "Outputs")]
    pub outputs: ActionOutputs,
    #[serde(rename = "Caching")]
    pub caching: Caching,
    #[serde(rename = "Environment")]
    pub environment: ActionEnvironment,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ActionInputs {
    #[serde(rename = "Sources")]
    pub sources: Vec<String>,
    #[serde(rename = "Artifacts")]
    pub artifacts: Vec<String>,
    #[serde(rename = "Variables")]
    pub variables: Vec<InputVariable>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct InputVariable {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ActionOutputs {
    #[serde(rename = "Sources")]
    pub sources: Vec<String>,
    #[serde(rename = "Artifacts")]
    pub artifacts: Vec<OutputArtifact>,
    #[serde(rename = "Variables")]
    pub variables: Vec<String>,
}

/// An artifact to collect at the end of a plan execution
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OutputArtifact {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Files")]
    pub files: Files,
}

/// `Files` accepts a single pattern or a list of patterns
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum Files {
    One(String),
    Many(Vec<serde_yaml::Value>),
}

impl Default for Files {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl Files {
    /// Flatten to a string list, rejecting non-string entries
    pub fn patterns(&self) -> Result<Vec<String>> {
        match self {
            Self::One(pattern) => Ok(vec![pattern.clone()]),
            Self::Many(values) => values
                .iter()
                .map(|value| match value {
                    serde_yaml::Value::String(s) => Ok(s.clone()),
                    other => Err(CatalystError::WorkflowParse {
                        path: String::new(),
                        details: format!("invalid files type: {other:?}"),
                    }),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Caching {
    #[serde(rename = "FileCaching")]
    pub file_caching: BTreeMap<String, FileCachingEntry>,
}

/// A directory cached across runs under a named key
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FileCachingEntry {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "RestoreKeys")]
    pub restore_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ActionEnvironment {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Connections")]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Connection {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Role")]
    pub role: String,
}

/// Group wrapper inside the Actions mapping
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ActionGroup {
    #[serde(rename = "Actions")]
    actions: BTreeMap<String, WorkflowAction>,
}

impl Workflow {
    /// Flatten the Actions mapping in document order. Grouped actions
    /// get ids of the form `group@action`.
    pub fn actions(&self) -> Result<Vec<(String, WorkflowAction)>> {
        let mut flattened = Vec::new();
        for (key, value) in &self.actions {
            let name = key.as_str().unwrap_or_default().to_string();
            let action: WorkflowAction = serde_yaml::from_value(value.clone())?;
            if !action.identifier.is_empty() {
                flattened.push((name, action));
            } else {
                let group: ActionGroup = serde_yaml::from_value(value.clone())?;
                for (sub_name, sub_action) in group.actions {
                    flattened.push((format!("{name}@{sub_name}"), sub_action));
                }
            }
        }
        Ok(flattened)
    }
}

/// Read and validate a workflow file
pub fn read_workflow(path: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path).map_err(|_| CatalystError::WorkflowNotFound {
        path: path.display().to_string(),
    })?;
    let mut workflow: Workflow =
        serde_yaml::from_str(&raw).map_err(|err| CatalystError::WorkflowParse {
            path: path.display().to_string(),
            details: err.to_string(),
        })?;
    workflow.path = path.to_path_buf();
    if workflow.schema_version != SUPPORTED_SCHEMA_VERSION {
        return Err(CatalystError::UnsupportedSchemaVersion {
            version: workflow.schema_version,
            path: path.display().to_string(),
        });
    }
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW_YAML: &str = r#"
Name: BuildAndTest
SchemaVersion: "1.0"
Compute:
  SharedInstance: true
Actions:
  Build:
    Identifier: aws/build@v1
    Configuration:
      Steps:
        - Run: make build
    Outputs:
      Variables:
        - Version
      Artifacts:
        - Name: dist
          Files: "build/**"
  Checks:
    Actions:
      Lint:
        Identifier: aws/build@v1
      Test:
        Identifier: aws/build@v1
        DependsOn:
          - Lint
"#;

    #[test]
    fn parses_actions_in_document_order_with_groups_flattened() {
        let workflow: Workflow = serde_yaml::from_str(WORKFLOW_YAML).unwrap();
        assert_eq!(workflow.name, "BuildAndTest");
        assert!(workflow.compute.shared_instance);

        let actions = workflow.actions().unwrap();
        let names: Vec<&str> = actions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Build", "Checks@Lint", "Checks@Test"]);
        assert_eq!(actions[2].1.depends_on, vec!["Lint"]);
    }

    #[test]
    fn files_accepts_string_and_list() {
        let one: OutputArtifact =
            serde_yaml::from_str("Name: a\nFiles: \"dist/*\"\n").unwrap();
        assert_eq!(one.files.patterns().unwrap(), vec!["dist/*"]);

        let many: OutputArtifact =
            serde_yaml::from_str("Name: a\nFiles:\n  - x\n  - y\n").unwrap();
        assert_eq!(many.files.patterns().unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn files_rejects_non_strings() {
        let bad: OutputArtifact = serde_yaml::from_str("Name: a\nFiles:\n  - 42\n").unwrap();
        assert!(bad.files.patterns().is_err());
    }

    #[test]
    fn unsupported_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        std::fs::write(&path, "Name: x\nSchemaVersion: \"2.0\"\n").unwrap();
        let err = read_workflow(&path).unwrap_err();
        assert!(matches!(
            err,
            CatalystError::UnsupportedSchemaVersion { .. }
        ));
    }

    #[test]
    fn missing_workflow_file_is_reported() {
        let err = read_workflow(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert!(matches!(err, CatalystError::WorkflowNotFound { .. }));
    }

    #[test]
    fn caching_entries_parse() {
        let action: WorkflowAction = serde_yaml::from_str(
            "Identifier: aws/build@v1\nCaching:\n  FileCaching:\n    deps:\n      Path: node_modules/\n",
        )
        .unwrap();
        assert_eq!(
            action.caching.file_caching.get("deps").unwrap().path,
            "node_modules/"
        );
    }
}

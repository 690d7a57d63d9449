//! Workflows: schema, providers and workflow-level features
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`schema`] | Workflow YAML parsing (actions, groups, artifacts, caching) |
//! | [`plans`] | Plans provider: actions → plans, remote/local/synthesised |
//! | [`features`] | Features provider: the per-plan pipeline |
//! | [`runner`] | Run entry: workflow discovery + scheduler hand-off |
//! | [`outputs`] | Shared per-plan outputs and the artifacts registry |
//! | [`file_cache`] | Directory caches across runs |
//! | [`input_artifacts`] / [`output_artifacts`] | Artifact transfer between plans |
//! | [`input_variables`] / [`replace_variables`] | Variable wiring and substitution |
//! | [`report`] | SARIF report scanning against success criteria |
//! | [`environment`] | Workflow environment → credential profile export |

pub mod environment;
pub mod features;
pub mod file_cache;
pub mod input_artifacts;
pub mod input_variables;
pub mod output_artifacts;
pub mod outputs;
pub mod plans;
pub mod replace_variables;
pub mod report;
pub mod runner;
pub mod schema;

pub use features::{OutputMode, WorkflowFeaturesProvider, WorkflowFeaturesProviderParams};
pub use outputs::{ArtifactRegistry, PlanOutputs};
pub use plans::WorkflowPlansProvider;
pub use replace_variables::{EnvSecretProvider, SecretProvider};
pub use report::{Report, ReportProcessor, ReportResult, SuccessCriteria, VulnerabilitySeverity};
pub use runner::{run, RunParams};
pub use schema::{read_workflow, Workflow, WorkflowAction};

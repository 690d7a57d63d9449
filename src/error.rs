//! Catalyst error types with stable error codes
//!
//! Error code ranges:
//! - CAT-000-009: Workflow errors
//! - CAT-010-019: Action errors
//! - CAT-020-029: Scheduler errors (includes the Deferred/Warning kinds)
//! - CAT-030-039: Command execution errors
//! - CAT-040-049: Container driver errors
//! - CAT-050-059: File staging errors
//! - CAT-060-069: Report errors
//! - CAT-090-099: IO / serialization errors

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalystError>;

/// Join aggregated plan errors for display, one per line
fn format_aggregate(errors: &[CatalystError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// All error variants are part of the public API.
///
/// `Deferred` and `Warning` are control-flow kinds, not user-facing
/// failures: the scheduler re-queues on `Deferred` and downgrades
/// `Warning` to success for the affected plan.
#[derive(Error, Debug, Diagnostic)]
pub enum CatalystError {
    // ═══════════════════════════════════════════
    // WORKFLOW ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[CAT-001] unable to read workflow file '{path}': {details}")]
    #[diagnostic(
        code(catalyst::workflow_parse),
        help("Check YAML syntax: indentation and quoting")
    )]
    WorkflowParse { path: String, details: String },

    #[error("[CAT-002] unsupported SchemaVersion={version} found in workflow {path}")]
    #[diagnostic(
        code(catalyst::schema_version),
        help("Only SchemaVersion \"1.0\" is supported")
    )]
    UnsupportedSchemaVersion { version: String, path: String },

    #[error("[CAT-003] unable to load workflow file '{path}'")]
    #[diagnostic(code(catalyst::workflow_not_found), help("Check the file path exists"))]
    WorkflowNotFound { path: String },

    #[error("[CAT-004] no workflow defined named '{name}'")]
    NoWorkflowNamed { name: String },

    #[error("[CAT-005] multiple workflows found, pass one of: {candidates}")]
    #[diagnostic(
        code(catalyst::workflow_ambiguous),
        help("Name the workflow as a positional argument")
    )]
    WorkflowAmbiguous { candidates: String },

    #[error("no AWS profile has been associated with environment {name}")]
    #[diagnostic(
        code(catalyst::environment_unmapped),
        help("Map the environment with --environments name=profile")
    )]
    EnvironmentUnmapped { name: String },

    // ═══════════════════════════════════════════
    // ACTION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[CAT-010] unable to parse {path}: {details}")]
    ActionLoad { path: String, details: String },

    #[error("input parameter '{name}' is required for action '{action}'")]
    #[diagnostic(
        code(catalyst::required_input),
        help("Add the input to the action's Configuration in the workflow")
    )]
    RequiredInput { name: String, action: String },

    #[error("[CAT-012] unknown action {identifier}")]
    UnknownAction { identifier: String },

    #[error("[CAT-013] GitHub actions are not currently supported")]
    GithubActionsUnsupported,

    #[error("[CAT-014] unsupported value for 'Using': {using}")]
    UnsupportedRuntime { using: String },

    /// Joined `[Text] Message` entries from an ACTION_RUN_SUMMARY output
    #[error("{0}")]
    ActionRunFailure(String),

    #[error("[CAT-016] unable to unmarshal ACTION_RUN_SUMMARY: {details}\n{raw}")]
    ActionSummaryParse { details: String, raw: String },

    #[error("[CAT-017] unable to download action from {url}: {details}")]
    #[diagnostic(
        code(catalyst::remote_action),
        help("Check network connectivity to the action source")
    )]
    RemoteActionDownload { url: String, details: String },

    #[error("secret '{name}' undefined")]
    #[diagnostic(
        code(catalyst::secret_undefined),
        help("Export the secret as an environment variable before running")
    )]
    SecretUndefined { name: String },

    // ═══════════════════════════════════════════
    // SCHEDULER KINDS (020-029)
    // ═══════════════════════════════════════════
    /// Sentinel: the plan is not ready; the scheduler re-queues it.
    #[error("[CAT-020] deferred")]
    Deferred,

    /// Logged at warn level and treated as success for the plan.
    #[error("{0}")]
    Warning(String),

    #[error("[CAT-022] cancelled")]
    Cancelled,

    #[error("💀 panic: {0}")]
    Panicked(String),

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<CatalystError>),

    // ═══════════════════════════════════════════
    // COMMAND EXECUTION (030-039)
    // ═══════════════════════════════════════════
    #[error("exitcode '127': command not found")]
    CommandNotFound,

    #[error("exitcode '{code}': failure")]
    CommandFailed { code: i64 },

    #[error("input source or artifact is required")]
    MissingSourceDir,

    #[error("unable to use bind mounts with shell executor for non-working directory: {path}")]
    BindUnsupported { path: String },

    // ═══════════════════════════════════════════
    // CONTAINER DRIVER (040-049)
    // ═══════════════════════════════════════════
    #[error("[CAT-040] service provider is unavailable: {executor}")]
    #[diagnostic(
        code(catalyst::provider_unavailable),
        help("Install docker or finch, or run with --executor shell")
    )]
    ProviderUnavailable { executor: String },

    #[error("[CAT-041] unable to pull image '{image}': {details}")]
    ImagePull { image: String, details: String },

    #[error("[CAT-042] unable to build image '{tag}': {details}")]
    ImageBuild { tag: String, details: String },

    #[error("[CAT-043] failed to create container: {details}")]
    ContainerCreate { details: String },

    #[error("[CAT-044] container runtime error: {0}")]
    Container(String),

    // ═══════════════════════════════════════════
    // FILE STAGING (050-059)
    // ═══════════════════════════════════════════
    #[error("[CAT-050] unable to collect files from '{path}': {details}")]
    Collect { path: String, details: String },

    #[error("[CAT-051] content path is tainted: {path}")]
    PathEscape { path: String },

    #[error("[CAT-052] unable to copy from '{src}' to '{dst}': {details}")]
    CopyDir {
        src: String,
        dst: String,
        details: String,
    },

    // ═══════════════════════════════════════════
    // REPORT ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("report status {result}")]
    ReportThreshold { result: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[CAT-093] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[CAT-094] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[CAT-095] YAML parse error: {0}")]
    #[diagnostic(
        code(catalyst::yaml_parse),
        help("Check YAML syntax: indentation must be consistent")
    )]
    Yaml(#[from] serde_yaml::Error),

    #[error("[CAT-096] HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("[CAT-097] zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl CatalystError {
    /// Build a `Warning` from a formatted message
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    /// True for the scheduler's re-queue sentinel
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }

    /// True for warnings, which count as success for the plan
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    /// Get the error code (e.g. "CAT-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowParse { .. } => "CAT-001",
            Self::UnsupportedSchemaVersion { .. } => "CAT-002",
            Self::WorkflowNotFound { .. } => "CAT-003",
            Self::NoWorkflowNamed { .. } => "CAT-004",
            Self::WorkflowAmbiguous { .. } => "CAT-005",
            Self::EnvironmentUnmapped { .. } => "CAT-006",
            Self::ActionLoad { .. } => "CAT-010",
            Self::RequiredInput { .. } => "CAT-011",
            Self::UnknownAction { .. } => "CAT-012",
            Self::GithubActionsUnsupported => "CAT-013",
            Self::UnsupportedRuntime { .. } => "CAT-014",
            Self::ActionRunFailure(_) => "CAT-015",
            Self::ActionSummaryParse { .. } => "CAT-016",
            Self::RemoteActionDownload { .. } => "CAT-017",
            Self::SecretUndefined { .. } => "CAT-018",
            Self::Deferred => "CAT-020",
            Self::Warning(_) => "CAT-021",
            Self::Cancelled => "CAT-022",
            Self::Panicked(_) => "CAT-023",
            Self::Aggregate(_) => "CAT-024",
            Self::CommandNotFound => "CAT-030",
            Self::CommandFailed { .. } => "CAT-031",
            Self::MissingSourceDir => "CAT-032",
            Self::BindUnsupported { .. } => "CAT-033",
            Self::ProviderUnavailable { .. } => "CAT-040",
            Self::ImagePull { .. } => "CAT-041",
            Self::ImageBuild { .. } => "CAT-042",
            Self::ContainerCreate { .. } => "CAT-043",
            Self::Container(_) => "CAT-044",
            Self::Collect { .. } => "CAT-050",
            Self::PathEscape { .. } => "CAT-051",
            Self::CopyDir { .. } => "CAT-052",
            Self::ReportThreshold { .. } => "CAT-060",
            Self::Io(_) => "CAT-093",
            Self::Json(_) => "CAT-094",
            Self::Yaml(_) => "CAT-095",
            Self::Http(_) => "CAT-096",
            Self::Zip(_) => "CAT-097",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_and_warning_are_distinguished() {
        assert!(CatalystError::Deferred.is_deferred());
        assert!(!CatalystError::Deferred.is_warning());
        let w = CatalystError::warning("cancelled p2: dependency p1 failed");
        assert!(w.is_warning());
        assert!(!w.is_deferred());
    }

    #[test]
    fn required_input_wording_is_stable() {
        let err = CatalystError::RequiredInput {
            name: "Foo".into(),
            action: "Missing inputs".into(),
        };
        assert_eq!(
            err.to_string(),
            "input parameter 'Foo' is required for action 'Missing inputs'"
        );
    }

    #[test]
    fn exit_code_wording() {
        assert_eq!(
            CatalystError::CommandNotFound.to_string(),
            "exitcode '127': command not found"
        );
        assert_eq!(
            CatalystError::CommandFailed { code: 2 }.to_string(),
            "exitcode '2': failure"
        );
    }

    #[test]
    fn aggregate_joins_lines() {
        let err = CatalystError::Aggregate(vec![
            CatalystError::CommandNotFound,
            CatalystError::MissingSourceDir,
        ]);
        let msg = err.to_string();
        assert!(msg.contains("command not found"));
        assert!(msg.contains("input source or artifact is required"));
        assert_eq!(msg.lines().count(), 2);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(CatalystError::Deferred.code(), "CAT-020");
        assert_eq!(CatalystError::CommandNotFound.code(), "CAT-030");
        assert_eq!(
            CatalystError::ReportThreshold {
                result: "FAILED".into()
            }
            .code(),
            "CAT-060"
        );
    }
}

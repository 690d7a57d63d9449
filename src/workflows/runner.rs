//! Workflow run entry: locate the workflow file, build providers,
//! hand everything to the scheduler

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::features::{OutputMode, WorkflowFeaturesProvider, WorkflowFeaturesProviderParams};
use super::plans::WorkflowPlansProvider;
use super::schema::{read_workflow, Workflow};
use crate::error::{CatalystError, Result};
use crate::runner::scheduler::{run_all, RunAllParams};
use crate::runner::step::RunCtx;
use crate::runner::ExecutionType;
use crate::tui::TuiHandle;

pub struct RunParams {
    pub working_dir: PathBuf,
    pub workflow_path: Option<PathBuf>,
    /// Select a workflow by `Name` when scanning the working dir
    pub workflow_name: Option<String>,
    /// Restrict the run to a single action
    pub action: Option<String>,
    pub execution_type: ExecutionType,
    pub concurrency: usize,
    pub reuse: bool,
    pub bind_working_dir: bool,
    pub no_output: bool,
    pub no_cache: bool,
    pub dryrun: bool,
    pub output_mode: OutputMode,
    pub environment_profiles: BTreeMap<String, String>,
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Locate the workflow to run and derive the working directory.
///
/// With an explicit file, the working dir sits three levels above it
/// (`<root>/.codecatalyst/workflows/<file>`). Otherwise the working
/// dir's workflow directory is scanned; a name selects among the
/// candidates, a single candidate is implied, anything else is an
/// error listing the options.
fn resolve_workflow(params: &RunParams) -> Result<(PathBuf, PathBuf)> {
    if let Some(workflow_path) = &params.workflow_path {
        if std::fs::metadata(workflow_path).is_err() {
            return Err(CatalystError::WorkflowNotFound {
                path: workflow_path.display().to_string(),
            });
        }
        let workflow_path = absolutize(workflow_path)?;
        let working_dir = workflow_path
            .ancestors()
            .nth(3)
            .unwrap_or(Path::new("/"))
            .to_path_buf();
        return Ok((workflow_path, working_dir));
    }

    let working_dir = absolutize(&params.working_dir)?;
    let workflows_dir = working_dir.join(".codecatalyst").join("workflows");
    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&workflows_dir)? {
        let entry = entry?;
        let path = entry.path();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        debug!("considering workflow file {}", path.display());
        let workflow = read_workflow(&path)?;
        candidates.push((workflow.name, path));
    }

    let selected = match &params.workflow_name {
        Some(name) => candidates
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, path)| path.clone())
            .ok_or_else(|| CatalystError::NoWorkflowNamed { name: name.clone() })?,
        None if candidates.len() == 1 => candidates[0].1.clone(),
        None => {
            return Err(CatalystError::WorkflowAmbiguous {
                candidates: candidates
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }
    };
    Ok((selected, working_dir))
}

/// Execute a workflow end to end
pub async fn run(ctx: &RunCtx, params: RunParams) -> Result<()> {
    let (workflow_path, working_dir) = resolve_workflow(&params)?;
    debug!("🚚 running workflow file '{}'", workflow_path.display());

    let workflow: Arc<Workflow> = Arc::new(read_workflow(&workflow_path)?);

    let plans = WorkflowPlansProvider::new(
        params.execution_type,
        &working_dir,
        params.action.clone(),
        Arc::clone(&workflow),
    );

    let tui = (params.output_mode == OutputMode::Tui)
        .then(|| TuiHandle::new(ctx.cancel.clone()));
    let features = WorkflowFeaturesProvider::new(WorkflowFeaturesProviderParams {
        workflow: Arc::clone(&workflow),
        loaded_actions: plans.loaded_actions.clone(),
        working_dir,
        reuse: params.reuse,
        output_mode: params.output_mode,
        no_output: params.no_output,
        no_cache: params.no_cache,
        dryrun: params.dryrun,
        bind_working_dir: params.bind_working_dir,
        environment_profiles: params.environment_profiles.clone(),
        secret_provider: None,
        tui: tui.clone(),
    })?;

    let result = run_all(
        ctx,
        RunAllParams {
            namespace: workflow.name.clone(),
            plans: &plans,
            features: Some(&features),
            concurrency: params.concurrency,
            execution_type: params.execution_type,
        },
    )
    .await;

    if let Some(tui) = tui {
        tui.shutdown();
    }
    debug!("execute complete: {result:?}");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(working_dir: &Path) -> RunParams {
        RunParams {
            working_dir: working_dir.to_path_buf(),
            workflow_path: None,
            workflow_name: None,
            action: None,
            execution_type: ExecutionType::Shell,
            concurrency: 1,
            reuse: false,
            bind_working_dir: false,
            no_output: false,
            no_cache: false,
            dryrun: false,
            output_mode: OutputMode::Text,
            environment_profiles: BTreeMap::new(),
        }
    }

    fn write_workflow(dir: &Path, file: &str, name: &str) {
        let workflows = dir.join(".codecatalyst/workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(
            workflows.join(file),
            format!("Name: {name}\nSchemaVersion: \"1.0\"\nActions: {{}}\n"),
        )
        .unwrap();
    }

    #[test]
    fn explicit_path_derives_working_dir_three_levels_up() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "ci.yaml", "CI");
        let mut p = params(dir.path());
        p.workflow_path = Some(dir.path().join(".codecatalyst/workflows/ci.yaml"));
        let (workflow, working_dir) = resolve_workflow(&p).unwrap();
        assert!(workflow.ends_with(".codecatalyst/workflows/ci.yaml"));
        assert_eq!(working_dir, dir.path());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = params(dir.path());
        p.workflow_path = Some(dir.path().join("nope.yaml"));
        assert!(matches!(
            resolve_workflow(&p),
            Err(CatalystError::WorkflowNotFound { .. })
        ));
    }

    #[test]
    fn single_candidate_is_selected_implicitly() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "only.yml", "Only");
        let (workflow, _) = resolve_workflow(&params(dir.path())).unwrap();
        assert!(workflow.ends_with("only.yml"));
    }

    #[test]
    fn named_selection_matches_workflow_name() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "a.yaml", "Alpha");
        write_workflow(dir.path(), "b.yaml", "Beta");
        let mut p = params(dir.path());
        p.workflow_name = Some("Beta".to_string());
        let (workflow, _) = resolve_workflow(&p).unwrap();
        assert!(workflow.ends_with("b.yaml"));

        p.workflow_name = Some("Gamma".to_string());
        let err = resolve_workflow(&p).unwrap_err();
        assert_eq!(err.to_string(), "[CAT-004] no workflow defined named 'Gamma'");
    }

    #[test]
    fn multiple_candidates_without_a_name_list_the_options() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "a.yaml", "Alpha");
        write_workflow(dir.path(), "b.yaml", "Beta");
        let err = resolve_workflow(&params(dir.path())).unwrap_err();
        match err {
            CatalystError::WorkflowAmbiguous { candidates } => {
                assert!(candidates.contains("Alpha"));
                assert!(candidates.contains("Beta"));
            }
            other => panic!("expected ambiguity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_workflow_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "empty.yaml", "Empty");
        run(&RunCtx::new(), params(dir.path())).await.unwrap();
    }
}

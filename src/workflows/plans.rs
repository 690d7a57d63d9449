//! Workflow plans provider: turns workflow actions into plans
//!
//! Identifier dispatch: `.` loads an action from the working
//! directory; `aws/build` and `aws/managed-test` are synthesised as
//! docker actions running the configured `Steps`; any other name is
//! looked up in the registry of known remote actions and downloaded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::schema::{Workflow, WorkflowAction};
use crate::actions::schema::{ActionOutputs as SpecOutputs, OutputVariable, Runs};
use crate::actions::{new_action_plan, ActionPlanParams, ActionSpec, UsingType};
use crate::error::{CatalystError, Result};
use crate::runner::plan::Plan;
use crate::runner::scheduler::PlansProvider;
use crate::runner::step::RunCtx;
use crate::runner::ExecutionType;
use crate::util::constants::CURATED_IMAGE;

/// Loaded/synthesised action specs per plan id, shared with the
/// features provider
pub type LoadedActions = Arc<DashMap<String, Arc<ActionSpec>>>;

pub struct WorkflowPlansProvider {
    pub execution_type: ExecutionType,
    pub working_dir: PathBuf,
    /// Restrict the run to a single action when set
    pub action_filter: Option<String>,
    pub workflow: Arc<Workflow>,
    pub loaded_actions: LoadedActions,
}

impl WorkflowPlansProvider {
    pub fn new(
        execution_type: ExecutionType,
        working_dir: impl Into<PathBuf>,
        action_filter: Option<String>,
        workflow: Arc<Workflow>,
    ) -> Self {
        Self {
            execution_type,
            working_dir: working_dir.into(),
            action_filter,
            workflow,
            loaded_actions: Arc::new(DashMap::new()),
        }
    }

    async fn plan_action(&self, name: &str, action: &WorkflowAction) -> Result<Plan> {
        debug!("creating action plan for action {}", action.identifier);
        let identifier = action
            .identifier
            .split('@')
            .next()
            .unwrap_or(&action.identifier);
        let mut steps = Vec::new();
        let spec = match identifier {
            "." => crate::actions::schema::load(&self.working_dir)?,
            "aws/build" | "aws/managed-test" => {
                steps = configured_steps(action);
                synthesize_build_action(identifier, action)
            }
            "aws/github-actions-runner" => return Err(CatalystError::GithubActionsUnsupported),
            _ => crate::actions::remote::load_remote_action(identifier).await?,
        };
        debug!("action spec: {spec:?}");

        let spec = Arc::new(spec);
        self.loaded_actions
            .insert(name.to_string(), Arc::clone(&spec));
        new_action_plan(&ActionPlanParams {
            action: spec,
            execution_type: self.execution_type,
            working_dir: self.working_dir.clone(),
            id: Some(name.to_string()),
            steps,
            depends_on: action.depends_on.clone(),
        })
    }
}

#[async_trait]
impl PlansProvider for WorkflowPlansProvider {
    async fn plans(&self, _ctx: &RunCtx) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        for (name, action) in self.workflow.actions()? {
            if self
                .action_filter
                .as_ref()
                .is_some_and(|filter| filter != &name)
            {
                continue;
            }
            let plan = self.plan_action(&name, &action).await.map_err(|err| {
                CatalystError::WorkflowParse {
                    path: self.workflow.path.display().to_string(),
                    details: format!("unable to create plan for action {name}: {err}"),
                }
            })?;
            plans.push(plan);
        }
        debug!("created {} plans from workflow", plans.len());
        Ok(plans)
    }
}

/// `aws/build`-style actions run their `Steps` strings in the curated
/// image; declared output variables pass through to the capture
/// filter.
fn synthesize_build_action(identifier: &str, action: &WorkflowAction) -> ActionSpec {
    let mut variables = BTreeMap::new();
    for output in &action.outputs.variables {
        variables.insert(output.clone(), OutputVariable::default());
    }
    ActionSpec {
        schema_version: "1.0".to_string(),
        id: identifier.to_string(),
        name: identifier.to_string(),
        version: action
            .identifier
            .split('@')
            .nth(1)
            .unwrap_or_default()
            .to_string(),
        runs: Runs {
            using: UsingType::Docker,
            image: CURATED_IMAGE.to_string(),
            entrypoint: "/bin/echo".to_string(),
            ..Default::default()
        },
        outputs: SpecOutputs { variables },
        ..Default::default()
    }
}

/// Extract `Configuration.Steps[].Run` strings
fn configured_steps(action: &WorkflowAction) -> Vec<String> {
    let Some(serde_yaml::Value::Sequence(steps)) = action.configuration.get("Steps") else {
        return Vec::new();
    };
    steps
        .iter()
        .filter_map(|step| step.get("Run"))
        .filter_map(|run| run.as_str())
        .map(str::to_string)
        .collect()
}

//! Workflow features provider: assembles the feature pipeline for
//! each plan
//!
//! The returned list is ordered outermost-first: the logger wraps the
//! dependency gate, which wraps variable wiring, artifact transfer,
//! status logging, caching, working-dir import, dry-run, output
//! capture, input derivation, and finally container reuse around the
//! raw plan runner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;

use super::environment::EnvironmentExport;
use super::file_cache::FileCache;
use super::input_artifacts::InputArtifacts;
use super::input_variables::InputVariableHandler;
use super::output_artifacts::OutputArtifacts;
use super::outputs::{ArtifactRegistry, PlanOutputs};
use super::plans::LoadedActions;
use super::replace_variables::{EnvSecretProvider, ReplaceVariableHandler, SecretProvider};
use super::schema::{Workflow, WorkflowAction};
use crate::actions::{ActionInputHandler, ActionOutputHandler};
use crate::error::{CatalystError, Result};
use crate::features::{
    ConsoleLogger, DependsOn, Dryrun, Feature, Reuse, StatusLogger, WorkingDirImporter,
};
use crate::runner::plan::Plan;
use crate::runner::scheduler::FeaturesProvider;
use crate::runner::tracker::PlanTracker;
use crate::tui::{TuiHandle, TuiLogger};
use crate::util::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Tui,
}

/// Parameters for [`WorkflowFeaturesProvider::new`]
pub struct WorkflowFeaturesProviderParams {
    pub workflow: Arc<Workflow>,
    pub loaded_actions: LoadedActions,
    pub working_dir: PathBuf,
    pub reuse: bool,
    pub output_mode: OutputMode,
    pub no_output: bool,
    pub no_cache: bool,
    pub dryrun: bool,
    pub bind_working_dir: bool,
    /// Workflow environment name → credential profile name
    pub environment_profiles: BTreeMap<String, String>,
    pub secret_provider: Option<Arc<dyn SecretProvider>>,
    pub tui: Option<TuiHandle>,
}

pub struct WorkflowFeaturesProvider {
    workflow_actions: BTreeMap<String, WorkflowAction>,
    loaded_actions: LoadedActions,
    cache_dir: PathBuf,
    working_dir: PathBuf,
    reuse: bool,
    output_mode: OutputMode,
    no_output: bool,
    no_cache: bool,
    dryrun: bool,
    bind_working_dir: bool,
    shared_compute: bool,
    environment_profiles: BTreeMap<String, String>,
    artifact_registry: ArtifactRegistry,
    plan_outputs: PlanOutputs,
    tracker: Arc<PlanTracker>,
    secret_provider: Arc<dyn SecretProvider>,
    working_dir_seeded: Arc<AtomicBool>,
    tui: Option<TuiHandle>,
}

impl WorkflowFeaturesProvider {
    pub fn new(params: WorkflowFeaturesProviderParams) -> Result<Self> {
        let mut workflow_actions = BTreeMap::new();
        for (name, action) in params.workflow.actions()? {
            workflow_actions.insert(name, action);
        }
        let cache_dir = paths::workflow_cache_dir(&params.workflow.path);
        Ok(Self {
            workflow_actions,
            loaded_actions: params.loaded_actions,
            cache_dir,
            working_dir: params.working_dir,
            reuse: params.reuse,
            output_mode: params.output_mode,
            no_output: params.no_output,
            no_cache: params.no_cache,
            dryrun: params.dryrun,
            bind_working_dir: params.bind_working_dir,
            shared_compute: params.workflow.compute.shared_instance,
            environment_profiles: params.environment_profiles,
            artifact_registry: Arc::new(DashMap::new()),
            plan_outputs: PlanOutputs::new(),
            tracker: PlanTracker::new(),
            secret_provider: params
                .secret_provider
                .unwrap_or_else(|| Arc::new(EnvSecretProvider)),
            working_dir_seeded: Arc::new(AtomicBool::new(false)),
            tui: params.tui,
        })
    }

    /// Captured plan outputs, exposed for inspection after a run
    pub fn plan_outputs(&self) -> &PlanOutputs {
        &self.plan_outputs
    }
}

impl FeaturesProvider for WorkflowFeaturesProvider {
    fn features(&self, plan: &Plan) -> Result<Vec<Box<dyn Feature>>> {
        let action = self.workflow_actions.get(&plan.id);
        let spec = self.loaded_actions.get(&plan.id).map(|s| s.value().clone());

        let mut ft: Vec<Box<dyn Feature>> = Vec::new();
        match (&self.output_mode, &self.tui) {
            (OutputMode::Tui, Some(tui)) => {
                ft.push(Box::new(TuiLogger::new(tui.clone(), &plan.id)));
            }
            _ => ft.push(Box::new(ConsoleLogger::new())),
        }
        ft.push(Box::new(DependsOn::new(
            self.tracker.progress_handle(&plan.id),
        )));

        let mut inputs = BTreeMap::new();
        if let Some(action) = action {
            for variable in &action.inputs.variables {
                inputs.insert(variable.name.clone(), variable.value.clone());
            }
        }
        ft.push(Box::new(InputVariableHandler::new(inputs)));
        ft.push(Box::new(ReplaceVariableHandler::new(
            self.plan_outputs.clone(),
            Arc::clone(&self.secret_provider),
        )));

        if let Some(action) = action {
            ft.push(Box::new(InputArtifacts::new(
                action.inputs.artifacts.clone(),
                Arc::clone(&self.artifact_registry),
                &self.cache_dir,
            )));
            ft.push(Box::new(OutputArtifacts::new(
                &plan.id,
                action.outputs.artifacts.clone(),
                &self.artifact_registry,
                &self.cache_dir,
            )));
        }

        ft.push(Box::new(StatusLogger::new(&plan.id)));

        if let Some(action) = action {
            if !self.no_cache {
                ft.push(Box::new(FileCache::new(
                    &self.working_dir,
                    action.caching.file_caching.clone(),
                    &self.cache_dir,
                )));
            }
            if !action.environment.name.is_empty() {
                let profile = self
                    .environment_profiles
                    .get(&action.environment.name)
                    .ok_or_else(|| CatalystError::EnvironmentUnmapped {
                        name: action.environment.name.clone(),
                    })?;
                ft.push(Box::new(EnvironmentExport::new(profile)));
            }
        }

        let imports_source = action.is_some_and(|a| {
            a.inputs.sources.iter().any(|s| s == "WorkflowSource")
        });
        if self.shared_compute || imports_source {
            ft.push(Box::new(WorkingDirImporter::new(
                &self.working_dir,
                &self.cache_dir,
                self.bind_working_dir,
                self.shared_compute,
                Arc::clone(&self.working_dir_seeded),
            )));
        }

        ft.push(Box::new(Dryrun::new(self.dryrun)));

        let filter: Vec<String> = spec
            .as_ref()
            .map(|s| s.outputs.variables.keys().cloned().collect())
            .unwrap_or_default();
        ft.push(Box::new(ActionOutputHandler::new(
            self.plan_outputs.slot(&plan.id),
            filter,
            self.no_output,
        )));

        if let Some(spec) = spec {
            let action_inputs = action
                .map(|a| configuration_inputs(a))
                .unwrap_or_default();
            ft.push(Box::new(ActionInputHandler::new(spec, action_inputs)));
        }

        ft.push(Box::new(Reuse::new(self.reuse)));
        Ok(ft)
    }
}

/// Workflow Configuration values provided for the action's declared
/// parameters; only scalar values apply.
fn configuration_inputs(action: &WorkflowAction) -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    for (name, value) in &action.configuration {
        let value = match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        inputs.insert(name.clone(), value);
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ExecutionType;
    use crate::workflows::plans::WorkflowPlansProvider;
    use crate::runner::scheduler::PlansProvider;
    use crate::runner::step::RunCtx;

    const WORKFLOW: &str = r#"
Name: Pipeline
SchemaVersion: "1.0"
Actions:
  Build:
    Identifier: aws/build@v1
    Configuration:
      Steps:
        - Run: make build
    Outputs:
      Variables:
        - Version
  Deploy:
    Identifier: aws/build@v1
    DependsOn:
      - Build
    Environment:
      Name: prod
"#;

    async fn build_provider(
        profiles: BTreeMap<String, String>,
    ) -> (WorkflowFeaturesProvider, Vec<Plan>) {
        let workflow: Arc<Workflow> = Arc::new(serde_yaml::from_str(WORKFLOW).unwrap());
        let plans_provider = WorkflowPlansProvider::new(
            ExecutionType::Docker,
            "/work/myrepo",
            None,
            Arc::clone(&workflow),
        );
        let plans = plans_provider.plans(&RunCtx::new()).await.unwrap();
        let provider = WorkflowFeaturesProvider::new(WorkflowFeaturesProviderParams {
            workflow,
            loaded_actions: plans_provider.loaded_actions.clone(),
            working_dir: PathBuf::from("/work/myrepo"),
            reuse: false,
            output_mode: OutputMode::Text,
            no_output: false,
            no_cache: false,
            dryrun: false,
            bind_working_dir: false,
            environment_profiles: profiles,
            secret_provider: None,
            tui: None,
        })
        .unwrap();
        (provider, plans)
    }

    #[tokio::test]
    async fn builds_a_pipeline_for_each_plan() {
        let (provider, plans) = build_provider(BTreeMap::from([(
            "prod".to_string(),
            "prod-profile".to_string(),
        )]))
        .await;
        for plan in &plans {
            let features = provider.features(plan).unwrap();
            assert!(features.len() >= 9, "expected a full pipeline");
        }
    }

    #[tokio::test]
    async fn unmapped_environment_is_an_error() {
        let (provider, plans) = build_provider(BTreeMap::new()).await;
        let deploy = plans.iter().find(|p| p.id == "Deploy").unwrap();
        let err = match provider.features(deploy) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(
            err.to_string(),
            "no AWS profile has been associated with environment prod"
        );
    }
}

//! Action plan builder: one action instance → command groups + env

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::actions::schema::{ActionSpec, UsingType};
use crate::error::{CatalystError, Result};
use crate::runner::plan::{CommandGroup, FileMap, FileMapKind, Plan};
use crate::runner::ExecutionType;
use crate::util::constants::{CONTAINER_ACTION_DIR, CURATED_IMAGE};

/// Parameters for [`new_action_plan`]
pub struct ActionPlanParams {
    pub action: Arc<ActionSpec>,
    pub execution_type: ExecutionType,
    pub working_dir: PathBuf,
    /// Overrides the action's own id as the plan id
    pub id: Option<String>,
    /// Extra commands appended to the main command group
    pub steps: Vec<String>,
    pub depends_on: Vec<String>,
}

/// Materialise an action into a schedulable plan
pub fn new_action_plan(params: &ActionPlanParams) -> Result<Plan> {
    let id = params
        .id
        .clone()
        .unwrap_or_else(|| params.action.id.clone());
    let working_dir = if params.working_dir.is_absolute() {
        params.working_dir.clone()
    } else {
        std::env::current_dir()?.join(&params.working_dir)
    };

    let mut plan = Plan::new(id, working_dir);
    plan.depends_on = params.depends_on.clone();
    for (key, value) in [
        ("CATALYST_WORKFLOW_SPACE_NAME", "-"),
        ("CATALYST_WORKFLOW_SPACE_ID", "-"),
        ("CATALYST_WORKFLOW_PROJECT_NAME", "-"),
        ("CATALYST_WORKFLOW_PROJECT_ID", "-"),
        ("CI", "true"),
    ] {
        plan.environment.env.insert(key.into(), value.into());
    }

    if params.action.runs.using == UsingType::Docker {
        load_docker_action(&mut plan, &params.action, &params.steps)?;
    } else {
        load_node_action(&mut plan, &params.action, &params.steps, params.execution_type)?;
    }
    Ok(plan)
}

fn new_command_group(image: Option<String>, entrypoint: &str) -> Result<CommandGroup> {
    let entrypoint = if entrypoint.is_empty() {
        Vec::new()
    } else {
        shell_words::split(entrypoint)
            .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?
    };
    Ok(CommandGroup {
        image,
        entrypoint,
        commands: Vec::new(),
    })
}

fn load_docker_action(plan: &mut Plan, action: &ActionSpec, steps: &[String]) -> Result<()> {
    let image = if action.runs.image.starts_with("docker://") {
        action.runs.image.clone()
    } else {
        action
            .basedir
            .join(&action.runs.image)
            .display()
            .to_string()
    };
    let phases = [
        &action.runs.pre_entrypoint,
        &action.runs.entrypoint,
        &action.runs.post_entrypoint,
    ];
    for (i, command) in phases.iter().enumerate() {
        if command.is_empty() {
            continue;
        }
        let mut group = new_command_group(Some(image.clone()), "/bin/cat")?;
        group.commands.push(vec![command.to_string()]);
        if i == 1 {
            debug!("steps: {steps:?}");
            for step in steps {
                if !step.is_empty() {
                    group.commands.push(vec![step.clone()]);
                }
            }
        }
        debug!("adding command group: {group:?}");
        plan.command_groups.push(group);
    }
    Ok(())
}

fn load_node_action(
    plan: &mut Plan,
    action: &ActionSpec,
    steps: &[String],
    execution_type: ExecutionType,
) -> Result<()> {
    let containerised = matches!(execution_type, ExecutionType::Docker | ExecutionType::Finch);
    let image = if containerised {
        match action.runs.using {
            UsingType::Node12 | UsingType::Node16 => Some(CURATED_IMAGE.to_string()),
            UsingType::Docker => {
                return Err(CatalystError::UnsupportedRuntime {
                    using: action.runs.using.as_str().to_string(),
                })
            }
        }
    } else {
        None
    };
    if containerised {
        plan.environment.file_maps.push(FileMap::new(
            FileMapKind::CopyInWithGitignore,
            &action.basedir,
            CONTAINER_ACTION_DIR,
        ));
    }

    let phases = [&action.runs.pre, &action.runs.main, &action.runs.post];
    for (i, command) in phases.iter().enumerate() {
        if command.is_empty() {
            continue;
        }
        let full_command = if containerised {
            plan.environment.env.insert(
                "CATALYST_SOURCE_DIR_CawsCustomActionSource".to_string(),
                CONTAINER_ACTION_DIR.to_string(),
            );
            Path::new(CONTAINER_ACTION_DIR)
                .join(&action.id)
                .join(command)
                .display()
                .to_string()
        } else {
            plan.environment.env.insert(
                "CATALYST_SOURCE_DIR_CawsCustomActionSource".to_string(),
                action.basedir.display().to_string(),
            );
            action.basedir.join(command).display().to_string()
        };
        let entrypoint = if containerised { "/bin/cat" } else { "" };
        let mut group = new_command_group(image.clone(), entrypoint)?;
        group
            .commands
            .push(vec!["node".to_string(), full_command]);
        if i == 1 {
            for step in steps {
                group.commands.push(vec![step.clone()]);
            }
        }
        plan.command_groups.push(group);
    }
    Ok(())
}

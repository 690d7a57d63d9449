//! End-to-end runs through the scheduler with the host-shell executor

#![cfg(unix)]

use std::path::PathBuf;

use async_trait::async_trait;

use catalyst::error::Result;
use catalyst::runner::plan::{CommandGroup, Plan};
use catalyst::runner::scheduler::{run_all, PlansProvider, RunAllParams};
use catalyst::runner::step::RunCtx;
use catalyst::runner::ExecutionType;

struct StaticPlans {
    working_dir: PathBuf,
    commands: Vec<Vec<&'static str>>,
}

#[async_trait]
impl PlansProvider for StaticPlans {
    async fn plans(&self, _ctx: &RunCtx) -> Result<Vec<Plan>> {
        let mut plan = Plan::new("only", &self.working_dir);
        plan.command_groups.push(CommandGroup {
            image: None,
            entrypoint: Vec::new(),
            commands: self
                .commands
                .iter()
                .map(|c| c.iter().map(|s| s.to_string()).collect())
                .collect(),
        });
        Ok(vec![plan])
    }
}

async fn run_commands(dir: &std::path::Path, commands: Vec<Vec<&'static str>>) -> Result<()> {
    let provider = StaticPlans {
        working_dir: dir.to_path_buf(),
        commands,
    };
    run_all(
        &RunCtx::new(),
        RunAllParams {
            namespace: "test".to_string(),
            plans: &provider,
            features: None,
            concurrency: 1,
            execution_type: ExecutionType::Shell,
        },
    )
    .await
}

#[tokio::test]
async fn successful_commands_complete_the_run() {
    let dir = tempfile::tempdir().unwrap();
    run_commands(dir.path(), vec![vec!["true"], vec!["echo", "done"]])
        .await
        .unwrap();
}

#[tokio::test]
async fn state_persists_across_commands_in_a_group() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("inner")).unwrap();
    run_commands(
        dir.path(),
        vec![
            vec!["cd inner && export SEEN=1"],
            // Runs in `inner` with SEEN exported, and proves it
            vec!["test", "\"$SEEN\"", "=", "1"],
            vec!["test \"$(basename $(pwd))\" = inner"],
        ],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn failing_command_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_commands(dir.path(), vec![vec!["true"], vec!["false"], vec!["true"]])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "exitcode '1': failure");
}

#[tokio::test]
async fn commands_write_files_into_the_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    run_commands(dir.path(), vec![vec!["echo payload > made-by-plan.txt"]])
        .await
        .unwrap();
    assert!(dir.path().join("made-by-plan.txt").exists());
}

//! Container executor lifecycle against the mock backend

use std::sync::Arc;

use catalyst::containers::mock::MockService;
use catalyst::containers::ContainerService;
use catalyst::error::CatalystError;
use catalyst::runner::command_executor::CommandExecutor;
use catalyst::runner::container_exec::ContainerCommandExecutor;
use catalyst::runner::plan::{CommandGroup, EnvironmentConfiguration, FileMap, FileMapKind};
use catalyst::runner::step::RunCtx;

fn environment(dir: &std::path::Path) -> EnvironmentConfiguration {
    let mut env = EnvironmentConfiguration::new(dir);
    env.env.insert(
        "CATALYST_SOURCE_DIR_WorkflowSource".to_string(),
        "git/v1/myrepo".to_string(),
    );
    env
}

fn registry_group() -> CommandGroup {
    CommandGroup {
        image: Some("docker://public.ecr.aws/example/image:1".to_string()),
        entrypoint: vec!["/bin/cat".to_string()],
        commands: vec![vec!["make build".to_string()]],
    }
}

fn service_of(mock: &Arc<MockService>) -> Arc<dyn ContainerService> {
    Arc::new(Arc::clone(mock))
}

#[tokio::test]
async fn lifecycle_is_pull_remove_create_copy_start() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockService::new();
    let mut env = environment(dir.path());
    env.file_maps.push(FileMap::new(
        FileMapKind::CopyInWithGitignore,
        dir.path().join("."),
        "git/v1/myrepo",
    ));

    let mut exec = ContainerCommandExecutor::new(
        &RunCtx::new(),
        "ns-Build",
        &registry_group(),
        &env,
        service_of(&mock),
    )
    .await
    .unwrap();

    let calls = mock.calls();
    let position = |needle: &str| {
        calls
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("missing call {needle} in {calls:?}"))
    };
    // Fresh runs force the pull
    assert!(calls[position("pull")].contains("force=true"));
    assert!(position("pull") < position("remove"));
    assert!(position("remove") < position("create"));
    assert!(position("create") < position("copy_in"));
    assert!(position("copy_in") < position("start"));

    exec.execute_command(&RunCtx::new(), &vec!["make build".to_string()])
        .await
        .unwrap();
    let calls = mock.calls();
    let last = calls.last().unwrap();
    assert!(last.starts_with("exec [/bin/sh /tmp/mce/tmp/script-"));

    exec.close(&RunCtx::new(), false).await.unwrap();
    let calls = mock.calls();
    // Outputs finalizer ran inside the container, container removed
    assert!(calls.iter().any(|c| c.contains("envout.sh")));
    assert!(calls.iter().any(|c| c.starts_with("remove")));
}

#[tokio::test]
async fn reuse_skips_rebuild_of_existing_image() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let group = CommandGroup {
        image: Some("Dockerfile".to_string()),
        entrypoint: Vec::new(),
        commands: vec![vec!["true".to_string()]],
    };

    // Cold cache: image gets built
    let mock = MockService::new();
    let mut env = environment(dir.path());
    env.reuse = true;
    ContainerCommandExecutor::new(&RunCtx::new(), "p", &group, &env, service_of(&mock))
        .await
        .unwrap();
    assert!(mock.calls().iter().any(|c| c.starts_with("build")));

    // Warm cache with reuse: no build and no pull happen
    let mock = MockService::new().with_local_image("catalyst-p:latest");
    ContainerCommandExecutor::new(&RunCtx::new(), "p", &group, &env, service_of(&mock))
        .await
        .unwrap();
    assert!(!mock.calls().iter().any(|c| c.starts_with("build")));
    assert!(!mock.calls().iter().any(|c| c.starts_with("pull")));
}

#[tokio::test]
async fn close_drains_copy_out_maps_through_extract() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockService::new();
    let mut env = environment(dir.path());
    env.file_maps.push(FileMap::new(
        FileMapKind::CopyOut,
        "git/v1/myrepo/.out",
        dir.path().join("cache-target"),
    ));

    let mut exec = ContainerCommandExecutor::new(
        &RunCtx::new(),
        "p",
        &registry_group(),
        &env,
        service_of(&mock),
    )
    .await
    .unwrap();
    exec.close(&RunCtx::new(), false).await.unwrap();

    let calls = mock.calls();
    assert!(calls
        .iter()
        .any(|c| c.contains("cp -a /codecatalyst/output/src/git/v1/myrepo/.out /extract")));
    assert!(calls.iter().any(|c| c.contains("copy_out /extract/.")));
    assert!(calls.iter().any(|c| c.contains("exec [rm -rf /extract]")));
    // The non-`/.` source cleared the host target before the copy
    assert!(dir.path().join("cache-target").exists());
}

#[tokio::test]
async fn error_close_skips_copy_out_and_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockService::new();
    let env = environment(dir.path());
    let mut exec = ContainerCommandExecutor::new(
        &RunCtx::new(),
        "p",
        &registry_group(),
        &env,
        service_of(&mock),
    )
    .await
    .unwrap();
    exec.close(&RunCtx::new(), true).await.unwrap();
    assert!(!mock.calls().iter().any(|c| c.contains("envout.sh")));
}

#[tokio::test]
async fn missing_source_dir_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let env = EnvironmentConfiguration::new(dir.path());
    let err = ContainerCommandExecutor::new(
        &RunCtx::new(),
        "p",
        &registry_group(),
        &env,
        service_of(&MockService::new()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CatalystError::MissingSourceDir));
}

//! Container command executor
//!
//! Prepares a container for one command group — image pull or build,
//! environment derivation, binds, staged copies — then runs each
//! command through the MCE wrapper so cwd and exported variables
//! persist between commands. Close drains `copy_out` maps through a
//! container-side `/extract` staging dir and removes the container
//! unless reuse is on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::containers::{BuildImageInput, ContainerHandle, ContainerService, NewContainerInput};
use crate::error::{CatalystError, Result};
use crate::runner::command_executor::CommandExecutor;
use crate::runner::mce;
use crate::runner::plan::{Command, CommandGroup, EnvironmentConfiguration, FileMapKind};
use crate::runner::resolve_path;
use crate::runner::step::{sequence, RunCtx, Step};
use crate::util::constants::{CONTAINER_NAME_PREFIX, CONTAINER_SOURCE_DIR, MCE_MOUNT};
use crate::util::paths;

pub struct ContainerCommandExecutor {
    container: Arc<dyn ContainerHandle>,
    reuse: bool,
    close_steps: Option<Vec<Step>>,
    mce_dir: PathBuf,
}

impl std::fmt::Debug for ContainerCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerCommandExecutor")
            .field("reuse", &self.reuse)
            .field("mce_dir", &self.mce_dir)
            .finish_non_exhaustive()
    }
}

impl ContainerCommandExecutor {
    pub async fn new(
        ctx: &RunCtx,
        id: &str,
        group: &CommandGroup,
        environment: &EnvironmentConfiguration,
        service: Arc<dyn ContainerService>,
    ) -> Result<Self> {
        let container_name = container_name(id);
        let raw_image = group.image.clone().unwrap_or_default();

        // Resolve the image: registry reference or local Dockerfile.
        // A built image that already exists is left alone under reuse.
        enum ImagePrep {
            Pull,
            Build(BuildImageInput),
            Ready,
        }
        let (image, image_prep) = match raw_image.strip_prefix("docker://") {
            Some(reference) => (reference.to_string(), ImagePrep::Pull),
            None => {
                let dockerfile = resolve_path(Path::new(&raw_image), &environment.working_dir);
                std::fs::metadata(&dockerfile)?;
                let image = format!("{container_name}:latest");
                let exists = match service.image_exists_locally(ctx, &image, "").await {
                    Ok(exists) => exists,
                    Err(err) => {
                        error!("unable to check for local image: {err}");
                        false
                    }
                };
                debug!("{image} exists? {exists}");
                let prep = if environment.reuse && exists {
                    ImagePrep::Ready
                } else {
                    ImagePrep::Build(BuildImageInput {
                        context_dir: dockerfile.parent().unwrap_or(Path::new(".")).to_path_buf(),
                        dockerfile: dockerfile
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        image_tag: image.clone(),
                        platform: String::new(),
                    })
                };
                (image, prep)
            }
        };

        let (env, container_default_dir) = setup_environment_variables(&environment.env)?;

        // MCE scratch dir, bind-mounted into the container
        let mce_dir = paths::new_scratch_dir("mce")?;
        let scratch = mce_dir.join("tmp");
        mce::seed_scratch(&scratch, &container_default_dir, Some(&env))?;
        mce::write_envout_script(&scratch, &format!("{MCE_MOUNT}/tmp"))?;

        let mut binds = vec![
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
            format!("{}:{}", mce_dir.display(), MCE_MOUNT),
        ];
        for map in &environment.file_maps {
            if map.kind == FileMapKind::Bind {
                let src = resolve_path(&map.source, &environment.working_dir);
                let target = container_path(&map.target);
                binds.push(format!("{}:{}{}", src.display(), target, bind_modifiers()));
            }
        }
        debug!("container binds: {binds:?}");
        debug!("container env: {env:?}");

        let mut input = NewContainerInput::new(image, &container_name);
        input.stdout = environment.stdout.clone();
        input.stderr = environment.stderr.clone();
        input.env = env;
        input.working_dir = container_default_dir;
        input.binds = binds;
        input.entrypoint = group.entrypoint.clone();
        let force_pull = !environment.reuse;
        let container: Arc<dyn ContainerHandle> = Arc::from(service.new_container(input));

        // Construction pipeline: image prep, stale-container removal,
        // create, copy-in maps in order, start
        let mut steps: Vec<Step> = Vec::new();
        match image_prep {
            ImagePrep::Build(build) => {
                let service = Arc::clone(&service);
                steps.push(Step::new(move |ctx| async move {
                    service.build_image(&ctx, &build).await
                }));
            }
            ImagePrep::Pull => {
                let c = Arc::clone(&container);
                steps.push(Step::new(move |ctx| async move {
                    c.pull(&ctx, force_pull).await
                }));
            }
            ImagePrep::Ready => {}
        }
        {
            let c = Arc::clone(&container);
            steps.push(
                Step::new(move |ctx| async move { c.remove(&ctx).await })
                    .if_bool(!environment.reuse),
            );
        }
        {
            let c = Arc::clone(&container);
            steps.push(Step::new(move |ctx| async move { c.create(&ctx, &[], &[]).await }));
        }
        for map in &environment.file_maps {
            let use_gitignore = match map.kind {
                FileMapKind::CopyIn => false,
                FileMapKind::CopyInWithGitignore => true,
                FileMapKind::Bind | FileMapKind::CopyOut => continue,
            };
            let c = Arc::clone(&container);
            let target = container_path(&map.target);
            let source = resolve_path(&map.source, &environment.working_dir);
            steps.push(Step::new(move |ctx| async move {
                c.copy_in(&ctx, &target, &source, use_gitignore).await
            }));
        }
        {
            let c = Arc::clone(&container);
            steps.push(Step::new(move |ctx| async move { c.start(&ctx, false).await }));
        }
        sequence(steps, ctx).await?;

        let close_steps = build_close_steps(&container, environment);

        Ok(Self {
            container,
            reuse: environment.reuse,
            close_steps: Some(close_steps),
            mce_dir,
        })
    }
}

#[async_trait]
impl CommandExecutor for ContainerCommandExecutor {
    async fn execute_command(&mut self, ctx: &RunCtx, command: &Command) -> Result<()> {
        let script_name = mce::write_wrapper_script(
            &self.mce_dir.join("tmp"),
            &format!("{MCE_MOUNT}/tmp"),
            &command.join(" "),
            true,
        )?;
        debug!("wrapper script: {script_name}");
        self.container
            .exec(
                ctx,
                &[
                    "/bin/sh".to_string(),
                    format!("{MCE_MOUNT}/tmp/{script_name}"),
                ],
                &BTreeMap::new(),
                "",
                "",
            )
            .await
    }

    async fn close(&mut self, ctx: &RunCtx, is_error: bool) -> Result<()> {
        let mut result = Ok(());
        if !is_error {
            if let Some(steps) = self.close_steps.take() {
                result = sequence(steps, ctx).await;
            }
        }
        if !self.reuse {
            // Removal must happen even after cancellation
            let cleanup_ctx = RunCtx::new().dry_run(ctx.dry_run);
            if let Err(err) = self.container.remove(&cleanup_ctx).await {
                error!("error removing container: {err}");
            }
        }
        if let Err(err) = std::fs::remove_dir_all(&self.mce_dir) {
            error!("error removing temp mce directory: {err}");
        }
        result
    }
}

/// Close executors: emit outputs, then drain each copy_out map via a
/// container-side staging directory.
fn build_close_steps(
    container: &Arc<dyn ContainerHandle>,
    environment: &EnvironmentConfiguration,
) -> Vec<Step> {
    let mut steps = Vec::new();
    {
        let c = Arc::clone(container);
        steps.push(Step::new(move |ctx| async move {
            c.exec(
                &ctx,
                &[
                    "/bin/sh".to_string(),
                    format!("{MCE_MOUNT}/tmp/{}", mce::ENVOUT_SH),
                ],
                &BTreeMap::new(),
                "",
                "/",
            )
            .await
        }));
    }
    for map in &environment.file_maps {
        if map.kind != FileMapKind::CopyOut {
            continue;
        }
        let src = container_path(&map.source);
        let host_target = resolve_path(&map.target, &environment.working_dir);

        let c = Arc::clone(container);
        steps.push(Step::new(move |ctx| async move {
            c.exec(
                &ctx,
                &["mkdir".to_string(), "-p".to_string(), "/extract".to_string()],
                &BTreeMap::new(),
                "",
                "/",
            )
            .await
        }));
        let c = Arc::clone(container);
        let copy_cmd = format!("cp -a {src} /extract || echo 'nothing to cache' > /dev/null 2>&1");
        steps.push(Step::new(move |ctx| async move {
            c.exec(
                &ctx,
                &["/bin/sh".to_string(), "-c".to_string(), copy_cmd],
                &BTreeMap::new(),
                "",
                "/",
            )
            .await
        }));
        if !src.ends_with("/.") {
            let target = host_target.clone();
            steps.push(Step::new(move |_ctx| async move { clean_dir(&target) }));
        }
        let c = Arc::clone(container);
        let target = host_target.clone();
        steps.push(Step::new(move |ctx| async move {
            c.copy_out(&ctx, &target, "/extract/.").await
        }));
        let c = Arc::clone(container);
        steps.push(Step::new(move |ctx| async move {
            c.exec(
                &ctx,
                &["rm".to_string(), "-rf".to_string(), "/extract".to_string()],
                &BTreeMap::new(),
                "",
                "/",
            )
            .await
        }));
    }
    steps
}

/// Clear and recreate a host directory before a copy-out lands in it
fn clean_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

fn container_name(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{CONTAINER_NAME_PREFIX}-{sanitized}").to_lowercase()
}

/// Resolve a container path against the container source root
fn container_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if raw.starts_with('/') {
        raw.into_owned()
    } else {
        format!("{CONTAINER_SOURCE_DIR}/{raw}")
    }
}

/// Derive the container environment: rewrite `CATALYST_SOURCE_DIR_*`
/// values under the source root, pick the default dir from the
/// WorkflowSource entry (or the first source entry), and export it as
/// `CATALYST_DEFAULT_DIR`.
fn setup_environment_variables(
    env: &BTreeMap<String, String>,
) -> Result<(Vec<String>, String)> {
    let mut container_default_dir = String::new();
    let mut vars = Vec::with_capacity(env.len() + 1);
    for (key, value) in env {
        let mut value = value.clone();
        if key.starts_with("CATALYST_SOURCE_DIR_") {
            if !value.starts_with('/') {
                value = format!("{CONTAINER_SOURCE_DIR}/{value}");
            }
            if key == "CATALYST_SOURCE_DIR_WorkflowSource" || container_default_dir.is_empty() {
                container_default_dir = value.clone();
            }
        }
        vars.push(format!("{key}={value}"));
    }
    if container_default_dir.is_empty() {
        return Err(CatalystError::MissingSourceDir);
    }
    vars.push(format!("CATALYST_DEFAULT_DIR={container_default_dir}"));
    Ok((vars, container_default_dir))
}

fn bind_modifiers() -> &'static str {
    if cfg!(target_os = "macos") {
        return ":consistent";
    }
    if selinux_enforcing() {
        return ":z";
    }
    ""
}

fn selinux_enforcing() -> bool {
    std::fs::read_to_string("/sys/fs/selinux/enforce")
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_sanitized_and_lowercased() {
        assert_eq!(container_name("ns-Build@Test"), "catalyst-ns-build_test");
        assert_eq!(container_name("plain"), "catalyst-plain");
    }

    #[test]
    fn source_dir_values_are_rewritten() {
        let mut env = BTreeMap::new();
        env.insert(
            "CATALYST_SOURCE_DIR_WorkflowSource".to_string(),
            "git/v1/myrepo".to_string(),
        );
        env.insert("CI".to_string(), "true".to_string());
        let (vars, default_dir) = setup_environment_variables(&env).unwrap();
        assert_eq!(default_dir, "/codecatalyst/output/src/git/v1/myrepo");
        assert!(vars.contains(&"CATALYST_SOURCE_DIR_WorkflowSource=/codecatalyst/output/src/git/v1/myrepo".to_string()));
        assert!(vars.contains(&"CATALYST_DEFAULT_DIR=/codecatalyst/output/src/git/v1/myrepo".to_string()));
        assert!(vars.contains(&"CI=true".to_string()));
    }

    #[test]
    fn workflow_source_wins_over_other_sources() {
        let mut env = BTreeMap::new();
        env.insert(
            "CATALYST_SOURCE_DIR_Artifact1".to_string(),
            "s3/01".to_string(),
        );
        env.insert(
            "CATALYST_SOURCE_DIR_WorkflowSource".to_string(),
            "/abs/src".to_string(),
        );
        let (_, default_dir) = setup_environment_variables(&env).unwrap();
        assert_eq!(default_dir, "/abs/src");
    }

    #[test]
    fn missing_source_dir_is_a_startup_error() {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        let err = setup_environment_variables(&env).unwrap_err();
        assert!(matches!(err, CatalystError::MissingSourceDir));
        assert_eq!(err.to_string(), "input source or artifact is required");
    }

    #[test]
    fn absolute_source_dirs_are_kept() {
        let mut env = BTreeMap::new();
        env.insert(
            "CATALYST_SOURCE_DIR_Artifact1".to_string(),
            "/already/abs".to_string(),
        );
        let (_, default_dir) = setup_environment_variables(&env).unwrap();
        assert_eq!(default_dir, "/already/abs");
    }

    #[test]
    fn container_path_resolution() {
        assert_eq!(
            container_path(Path::new("git/v1/myrepo")),
            "/codecatalyst/output/src/git/v1/myrepo"
        );
        assert_eq!(container_path(Path::new("/extract")), "/extract");
    }
}

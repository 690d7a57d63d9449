//! Host-shell command executor
//!
//! Applies the MCE persistence convention in a host scratch directory:
//! copy-in maps materialise into the scratch dir, copy-out maps copy
//! back to the host target on close, and a bind of anything other
//! than the working directory itself is rejected.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::error::{CatalystError, Result};
use crate::fsutil;
use crate::runner::command_executor::CommandExecutor;
use crate::runner::logsink::LogSink;
use crate::runner::mce;
use crate::runner::plan::{Command, EnvironmentConfiguration, FileMap, FileMapKind};
use crate::runner::resolve_path;
use crate::runner::step::RunCtx;
use crate::util::paths;

pub struct ShellCommandExecutor {
    stdout: LogSink,
    stderr: LogSink,
    env: Vec<(String, String)>,
    working_dir: PathBuf,
    copy_outs: Vec<FileMap>,
    host_working_dir: PathBuf,
    mce_dir: PathBuf,
}

impl std::fmt::Debug for ShellCommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellCommandExecutor")
            .field("working_dir", &self.working_dir)
            .field("host_working_dir", &self.host_working_dir)
            .field("mce_dir", &self.mce_dir)
            .finish_non_exhaustive()
    }
}

impl ShellCommandExecutor {
    pub async fn new(_ctx: &RunCtx, environment: &EnvironmentConfiguration) -> Result<Self> {
        let mce_dir = paths::new_scratch_dir("mce")?;

        let mut copy_outs = Vec::new();
        for map in &environment.file_maps {
            match map.kind {
                FileMapKind::CopyOut => copy_outs.push(map.clone()),
                FileMapKind::Bind => {
                    // Only a bind of the working directory itself is a
                    // no-op here; commands simply run in it.
                    let src = resolve_path(&map.source, &environment.working_dir);
                    if src != environment.working_dir {
                        return Err(CatalystError::BindUnsupported {
                            path: map.source.display().to_string(),
                        });
                    }
                }
                FileMapKind::CopyIn | FileMapKind::CopyInWithGitignore => {
                    let use_gitignore = map.kind == FileMapKind::CopyInWithGitignore;
                    let dest = resolve_path(&map.target, &mce_dir);
                    let src = resolve_path(&map.source, &environment.working_dir);
                    let src = preserve_dot(&map.source, src);
                    tokio::task::spawn_blocking(move || {
                        fsutil::copy_dir(&dest, &src, use_gitignore)
                    })
                    .await
                    .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))??;
                }
            }
        }

        // Derive the environment: source dirs resolve into the scratch
        // root; ${VAR} references interpolate from the plan env.
        let mut default_dir = String::new();
        let mut env = Vec::new();
        for (key, value) in &environment.env {
            let mut value = value.clone();
            if key.starts_with("CATALYST_SOURCE_DIR_") {
                if !value.starts_with('/') {
                    value = format!("{}/{value}", mce_dir.display());
                }
                if key == "CATALYST_SOURCE_DIR_WorkflowSource" || default_dir.is_empty() {
                    default_dir = value.clone();
                }
            }
            env.push((key.clone(), interpolate(&value, &environment.env)));
        }
        if default_dir.is_empty() {
            default_dir = environment.working_dir.display().to_string();
        }
        env.push(("PATH".to_string(), std::env::var("PATH").unwrap_or_default()));
        env.push(("CATALYST_DEFAULT_DIR".to_string(), default_dir.clone()));

        mce::seed_scratch(&mce_dir, &default_dir, None)?;

        Ok(Self {
            stdout: environment.stdout.clone(),
            stderr: environment.stderr.clone(),
            env,
            working_dir: PathBuf::from(default_dir),
            copy_outs,
            host_working_dir: environment.working_dir.clone(),
            mce_dir,
        })
    }

    async fn run_copy_outs(&self) -> Result<()> {
        for map in &self.copy_outs {
            let source = resolve_path(&map.source, &self.mce_dir);
            let target = resolve_path(&map.target, &self.host_working_dir);
            debug!("clearing cache {}", target.display());
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            let pattern = source.display().to_string();
            let sources: Vec<PathBuf> = glob::glob(&pattern)
                .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?
                .filter_map(|p| p.ok())
                .collect();
            debug!("copying {sources:?} ({pattern}) to {}", target.display());
            for src in sources {
                let src = preserve_dot(&map.source, src);
                let target = target.clone();
                tokio::task::spawn_blocking(move || fsutil::copy_dir(&target, &src, false))
                    .await
                    .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))??;
            }
        }
        Ok(())
    }
}

/// `resolve_path` normalizes away a trailing `/.`, but the collector
/// relies on it to collect contents without the basename — put it back
/// when the original map carried one.
fn preserve_dot(original: &Path, resolved: PathBuf) -> PathBuf {
    if original.to_string_lossy().ends_with("/.")
        && !resolved.to_string_lossy().ends_with("/.")
    {
        PathBuf::from(format!("{}/.", resolved.display()))
    } else {
        resolved
    }
}

/// Expand `${NAME}` / `$NAME` references from the plan env map,
/// leaving unknown references untouched.
fn interpolate(value: &str, vars: &BTreeMap<String, String>) -> String {
    let pattern = Regex::new(r"\$\{?([a-zA-Z0-9_\-.]+)\}?").expect("valid regex");
    pattern
        .replace_all(value, |caps: &regex::Captures<'_>| {
            match vars.get(&caps[1]) {
                Some(replacement) => replacement.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute_command(&mut self, ctx: &RunCtx, command: &Command) -> Result<()> {
        let script_name = mce::write_wrapper_script(
            &self.mce_dir,
            &self.mce_dir.display().to_string(),
            &command.join(" "),
            false,
        )?;
        let script_path = self.mce_dir.join(&script_name);
        debug!(
            "💻 shell run command={command:?} workdir={}",
            self.working_dir.display()
        );
        if ctx.dry_run {
            debug!("exit for dryrun");
            return Ok(());
        }

        let mut child = TokioCommand::new("/bin/sh")
            .arg(&script_path)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(self.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let out_task = child.stdout.take().map(|pipe| {
            let sink = self.stdout.clone();
            tokio::spawn(async move { stream_lines(pipe, sink).await })
        });
        let err_task = child.stderr.take().map(|pipe| {
            let sink = self.stderr.clone();
            tokio::spawn(async move { stream_lines(pipe, sink).await })
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(CatalystError::Cancelled);
            }
        };
        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }
        match status.code() {
            Some(0) => Ok(()),
            Some(127) => Err(CatalystError::CommandNotFound),
            Some(code) => Err(CatalystError::CommandFailed { code: code as i64 }),
            None => Err(CatalystError::CommandFailed { code: -1 }),
        }
    }

    async fn close(&mut self, ctx: &RunCtx, is_error: bool) -> Result<()> {
        let mut result = Ok(());
        if !is_error && !ctx.dry_run {
            result = self.run_copy_outs().await;
            if result.is_ok() {
                result = mce::emit_outputs(&self.mce_dir, &self.stdout);
            }
        }
        debug!("close() is removing {}", self.mce_dir.display());
        if let Err(err) = std::fs::remove_dir_all(&self.mce_dir) {
            debug!("error removing scratch dir: {err}");
        }
        result
    }
}

async fn stream_lines<R>(pipe: R, sink: LogSink)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.line(&format!("{line}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::logsink::testing::RecordingSink;
    use crate::runner::plan::EnvironmentConfiguration;

    fn environment(dir: &Path) -> EnvironmentConfiguration {
        EnvironmentConfiguration::new(dir)
    }

    #[tokio::test]
    async fn bind_of_non_working_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = environment(dir.path());
        env.file_maps.push(FileMap::new(
            FileMapKind::Bind,
            "/somewhere/else",
            "git/v1/x",
        ));
        let err = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalystError::BindUnsupported { .. }));
    }

    #[tokio::test]
    async fn bind_of_working_dir_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = environment(dir.path());
        env.file_maps
            .push(FileMap::new(FileMapKind::Bind, ".", "git/v1/x"));
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        exec.close(&RunCtx::new(), false).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cwd_and_env_persist_between_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let env = environment(dir.path());
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        let ctx = RunCtx::new();

        exec.execute_command(&ctx, &vec!["cd sub && export MARKER=present".to_string()])
            .await
            .unwrap();
        // The next command starts in `sub` with MARKER exported
        exec.execute_command(
            &ctx,
            &vec!["test \"$(basename $(pwd))\" = sub && test \"$MARKER\" = present".to_string()],
        )
        .await
        .unwrap();
        exec.close(&ctx, false).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exported_variables_become_set_output_lines_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path());
        let sink = RecordingSink::shared();
        let mut env = env;
        env.stdout = sink.clone();
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        let ctx = RunCtx::new();
        exec.execute_command(&ctx, &vec!["export Foo=Bar".to_string()])
            .await
            .unwrap();
        exec.close(&ctx, false).await.unwrap();
        assert!(sink
            .lines()
            .iter()
            .any(|l| l == "::set-output name=Foo::Bar\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_maps_to_command_failed() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path());
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        let ctx = RunCtx::new();
        let err = exec
            .execute_command(&ctx, &vec!["exit 3".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalystError::CommandFailed { code: 3 }));
        exec.close(&ctx, true).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_command_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(dir.path());
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        let ctx = RunCtx::new();
        let err = exec
            .execute_command(&ctx, &vec!["definitely_not_a_command_xyz".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalystError::CommandNotFound));
        exec.close(&ctx, true).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copy_out_lands_in_host_target_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache");
        // Stale content must be cleared before the copy lands
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale.txt"), "old").unwrap();
        let mut env = environment(dir.path());
        env.file_maps.push(FileMap::new(
            FileMapKind::CopyOut,
            "out/result.txt",
            &target,
        ));
        let mut exec = ShellCommandExecutor::new(&RunCtx::new(), &env)
            .await
            .unwrap();
        let ctx = RunCtx::new();
        // Write into the scratch dir where copy-out sources resolve
        exec.execute_command(
            &ctx,
            &vec![format!(
                "mkdir -p {0}/out && echo data > {0}/out/result.txt",
                exec.mce_dir.display()
            )],
        )
        .await
        .unwrap();
        exec.close(&ctx, false).await.unwrap();
        assert!(target.join("result.txt").exists());
        assert!(!target.join("stale.txt").exists());
    }

    #[test]
    fn interpolate_expands_known_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("HOME_DIR".to_string(), "/home/bob".to_string());
        assert_eq!(
            interpolate("${HOME_DIR}/src", &vars),
            "/home/bob/src".to_string()
        );
        assert_eq!(interpolate("$HOME_DIR", &vars), "/home/bob");
        assert_eq!(interpolate("${UNKNOWN}", &vars), "${UNKNOWN}");
    }
}

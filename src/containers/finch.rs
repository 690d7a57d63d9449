//! Finch backend: drives the `finch` CLI
//!
//! Every operation shells out; copy uses `finch cp`, and gitignore-
//! aware copy-in stages through a filtered temp tree first because the
//! CLI has no exclusion support.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::containers::types::{
    BuildImageInput, ContainerHandle, ContainerService, NewContainerInput,
};
use crate::error::{CatalystError, Result};
use crate::fsutil;
use crate::runner::logsink::LogSink;
use crate::runner::step::RunCtx;
use crate::util::paths;

/// Probe: `finch container ls` answers, unless `NOFINCH` is set
pub async fn available(ctx: &RunCtx) -> bool {
    if std::env::var_os("NOFINCH").is_some() {
        return false;
    }
    match run_quiet(ctx, &["container", "ls"]).await {
        Ok(_) => true,
        Err(err) => {
            debug!("finch is unavailable: {err}");
            false
        }
    }
}

/// Run finch, capturing stdout; non-zero exit is an error carrying
/// the captured stderr.
async fn run_quiet(ctx: &RunCtx, args: &[&str]) -> Result<String> {
    debug!("🐦 finch {}", args.join(" "));
    if ctx.dry_run {
        return Ok(String::new());
    }
    let output = TokioCommand::new("finch")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| CatalystError::Container(format!("unable to start finch: {err}")))?;
    if !output.status.success() {
        return Err(CatalystError::Container(format!(
            "finch {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run finch streaming stdout/stderr into line sinks; returns the
/// process exit code.
async fn run_streaming(
    ctx: &RunCtx,
    args: &[String],
    stdout: LogSink,
    stderr: LogSink,
) -> Result<i64> {
    debug!("🐦 finch {}", args.join(" "));
    if ctx.dry_run {
        return Ok(0);
    }
    let mut child = TokioCommand::new("finch")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CatalystError::Container(format!("unable to start finch: {err}")))?;

    let out = child.stdout.take().map(|pipe| {
        let sink = stdout.clone();
        tokio::spawn(async move { stream_lines(pipe, sink).await })
    });
    let err = child.stderr.take().map(|pipe| {
        let sink = stderr.clone();
        tokio::spawn(async move { stream_lines(pipe, sink).await })
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = ctx.cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(CatalystError::Cancelled);
        }
    };
    if let Some(task) = out {
        let _ = task.await;
    }
    if let Some(task) = err {
        let _ = task.await;
    }
    Ok(status.code().unwrap_or(-1) as i64)
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

pub struct FinchService;

#[async_trait]
impl ContainerService for FinchService {
    async fn image_exists_locally(
        &self,
        ctx: &RunCtx,
        image: &str,
        _platform: &str,
    ) -> Result<bool> {
        Ok(run_quiet(ctx, &["image", "inspect", image]).await.is_ok())
    }

    async fn build_image(&self, ctx: &RunCtx, input: &BuildImageInput) -> Result<()> {
        info!("🐦 finch build -t {} {}", input.image_tag, input.context_dir.display());
        let dockerfile = input.context_dir.join(&input.dockerfile);
        let mut args = vec![
            "build".to_string(),
            "-t".to_string(),
            input.image_tag.clone(),
            "-f".to_string(),
            dockerfile.display().to_string(),
        ];
        if !input.platform.is_empty() {
            args.push("--platform".to_string());
            args.push(input.platform.clone());
        }
        args.push(input.context_dir.display().to_string());
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        run_quiet(ctx, &args_ref)
            .await
            .map_err(|err| CatalystError::ImageBuild {
                tag: input.image_tag.clone(),
                details: err.to_string(),
            })?;
        Ok(())
    }

    fn new_container(&self, input: NewContainerInput) -> Box<dyn ContainerHandle> {
        Box::new(FinchContainer {
            input,
            id: Mutex::new(String::new()),
        })
    }
}

#[derive(Deserialize)]
struct FinchContainerSpec {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: NamesField,
}

/// `Names` varies between a plain string and a list across finch
/// versions; model the union explicitly.
#[derive(Deserialize)]
#[serde(untagged)]
enum NamesField {
    One(String),
    Many(Vec<String>),
}

impl NamesField {
    fn contains(&self, name: &str) -> bool {
        match self {
            Self::One(n) => n == name,
            Self::Many(ns) => ns.iter().any(|n| n == name),
        }
    }
}

pub struct FinchContainer {
    input: NewContainerInput,
    id: Mutex<String>,
}

impl FinchContainer {
    fn current_id(&self) -> Option<String> {
        let id = self.id.lock().unwrap();
        (!id.is_empty()).then(|| id.clone())
    }

    async fn find(&self, ctx: &RunCtx) -> Result<Option<String>> {
        if let Some(id) = self.current_id() {
            return Ok(Some(id));
        }
        let out = run_quiet(ctx, &["container", "ls", "--all", "--format", "{{json .}}"]).await?;
        for line in out.lines() {
            let spec: FinchContainerSpec = serde_json::from_str(line).map_err(|err| {
                CatalystError::Container(format!("failed unmarshalling container spec: {err}"))
            })?;
            if spec.names.contains(&self.input.name) {
                *self.id.lock().unwrap() = spec.id.clone();
                return Ok(Some(spec.id));
            }
        }
        Ok(None)
    }

    fn require_id(&self) -> Result<String> {
        self.current_id()
            .ok_or_else(|| CatalystError::Container("container not created".into()))
    }
}

#[async_trait]
impl ContainerHandle for FinchContainer {
    async fn pull(&self, ctx: &RunCtx, force: bool) -> Result<()> {
        info!("🐦 finch pull image={}", self.input.image);
        if !force
            && run_quiet(ctx, &["image", "inspect", &self.input.image])
                .await
                .is_ok()
        {
            return Ok(());
        }
        let mut args = vec!["pull"];
        if !self.input.platform.is_empty() {
            args.push("--platform");
            args.push(&self.input.platform);
        }
        args.push(&self.input.image);
        run_quiet(ctx, &args)
            .await
            .map_err(|err| CatalystError::ImagePull {
                image: self.input.image.clone(),
                details: err.to_string(),
            })?;
        Ok(())
    }

    async fn create(&self, ctx: &RunCtx, cap_add: &[String], cap_drop: &[String]) -> Result<()> {
        if self.find(ctx).await?.is_some() {
            return Ok(());
        }
        let mut args: Vec<String> = vec![
            "create".into(),
            "--tty".into(),
            "--workdir".into(),
            self.input.working_dir.clone(),
            "--name".into(),
            self.input.name.clone(),
        ];
        if self.input.privileged {
            args.push("--privileged".into());
        }
        for bind in &self.input.binds {
            args.push("--volume".into());
            args.push(bind.clone());
        }
        for cap in cap_add {
            args.push("--cap-add".into());
            args.push(cap.clone());
        }
        for cap in cap_drop {
            args.push("--cap-drop".into());
            args.push(cap.clone());
        }
        for env in &self.input.env {
            args.push("--env".into());
            args.push(env.clone());
        }
        if !self.input.entrypoint.is_empty() {
            args.push("--entrypoint".into());
            args.extend(self.input.entrypoint.iter().cloned());
        }
        args.push(self.input.image.clone());
        args.extend(self.input.cmd.iter().cloned());

        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = run_quiet(ctx, &args_ref)
            .await
            .map_err(|err| CatalystError::ContainerCreate {
                details: err.to_string(),
            })?;
        let id = out.trim_end().to_string();
        debug!(
            "created container name={} id={id} from image {}",
            self.input.name, self.input.image
        );
        *self.id.lock().unwrap() = id;
        Ok(())
    }

    async fn start(&self, ctx: &RunCtx, attach: bool) -> Result<()> {
        info!("🐦 finch run image={}", self.input.image);
        if ctx.dry_run {
            return Ok(());
        }
        let id = self.require_id()?;
        let mut args = vec!["start", id.as_str()];
        if attach {
            args.push("--attach");
        }
        run_quiet(ctx, &args).await?;
        if attach {
            self.wait(ctx).await?;
        }
        Ok(())
    }

    async fn wait(&self, ctx: &RunCtx) -> Result<()> {
        if ctx.dry_run {
            return Ok(());
        }
        let id = self.require_id()?;
        let out = run_quiet(ctx, &["wait", &id]).await?;
        let status = out.trim();
        if status != "0" && !status.is_empty() {
            return Err(CatalystError::CommandFailed {
                code: status.parse().unwrap_or(-1),
            });
        }
        Ok(())
    }

    async fn exec(
        &self,
        ctx: &RunCtx,
        command: &[String],
        env: &BTreeMap<String, String>,
        user: &str,
        workdir: &str,
    ) -> Result<()> {
        if ctx.dry_run {
            debug!("🐦 finch exec cmd=[{}]", command.join(" "));
            return Ok(());
        }
        let id = self.require_id()?;
        let wd = if workdir.is_empty() {
            self.input.working_dir.clone()
        } else if workdir.starts_with('/') {
            workdir.to_string()
        } else {
            format!("{}/{}", self.input.working_dir, workdir)
        };
        let mut args: Vec<String> = vec!["exec".into(), "--workdir".into(), wd];
        if !user.is_empty() {
            args.push("--user".into());
            args.push(user.to_string());
        }
        for (k, v) in env {
            args.push("--env".into());
            args.push(format!("{k}={v}"));
        }
        args.push(id);
        args.extend(command.iter().cloned());

        let code = run_streaming(
            ctx,
            &args,
            self.input.stdout.clone(),
            self.input.stderr.clone(),
        )
        .await?;
        match code {
            0 => Ok(()),
            127 => Err(CatalystError::CommandNotFound),
            code => Err(CatalystError::CommandFailed { code }),
        }
    }

    async fn copy_in(
        &self,
        ctx: &RunCtx,
        container_path: &str,
        host_path: &Path,
        use_gitignore: bool,
    ) -> Result<()> {
        debug!(
            "🐦 finch copyIn hostPath={} containerPath={container_path}",
            host_path.display()
        );
        if ctx.dry_run {
            return Ok(());
        }
        let id = self.require_id()?;
        let metadata = std::fs::metadata(host_path).map_err(|err| CatalystError::CopyDir {
            src: host_path.display().to_string(),
            dst: container_path.to_string(),
            details: err.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(CatalystError::CopyDir {
                src: host_path.display().to_string(),
                dst: container_path.to_string(),
                details: "unsupported host path".into(),
            });
        }
        let mut source = host_path.display().to_string();
        let mut _staged = None;
        if use_gitignore {
            // The CLI cannot exclude files, so stage a filtered copy
            let temp = tempfile::Builder::new()
                .prefix("finch-copyin")
                .tempdir_in(paths::tmp_dir())?;
            let host = host_path.to_path_buf();
            let dest = temp.path().to_path_buf();
            tokio::task::spawn_blocking(move || fsutil::copy_dir(&dest, &host, true))
                .await
                .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))??;
            source = format!("{}/.", temp.path().display());
            _staged = Some(temp);
        }
        run_quiet(
            ctx,
            &["cp", &source, &format!("{id}:{container_path}")],
        )
        .await?;
        Ok(())
    }

    async fn copy_out(&self, ctx: &RunCtx, host_path: &Path, container_path: &str) -> Result<()> {
        debug!(
            "🐦 finch copyOut containerPath={container_path} hostPath={}",
            host_path.display()
        );
        if ctx.dry_run {
            return Ok(());
        }
        let id = self.require_id()?;
        if let Some(parent) = host_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        run_quiet(
            ctx,
            &[
                "cp",
                &format!("{id}:{container_path}"),
                &host_path.display().to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, ctx: &RunCtx) -> Result<()> {
        let Some(id) = self.current_id() else {
            return Ok(());
        };
        debug!("🐦 finch rm {id}");
        run_quiet(ctx, &["rm", "--force", "--volumes", &id]).await?;
        self.id.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_field_accepts_both_shapes() {
        let one: FinchContainerSpec =
            serde_json::from_str(r#"{"ID":"abc","Names":"catalyst-build"}"#).unwrap();
        assert!(one.names.contains("catalyst-build"));

        let many: FinchContainerSpec =
            serde_json::from_str(r#"{"ID":"abc","Names":["x","catalyst-build"]}"#).unwrap();
        assert!(many.names.contains("catalyst-build"));
        assert!(!many.names.contains("other"));
    }
}

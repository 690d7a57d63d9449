//! Docker backend: talks to the daemon over its HTTP API via bollard
//!
//! Copy-in streams tar archives produced by the file collector; exec
//! attaches to the daemon and demultiplexes output line by line into
//! the environment sinks. Cancellation of an in-flight exec writes a
//! Ctrl-C byte to the attach stream before surfacing the context
//! error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::containers::types::{
    registry_host, stored_auth, BuildImageInput, CaptureSink, ContainerHandle, ContainerService,
    NewContainerInput, RegistryAuth,
};
use crate::error::{CatalystError, Result};
use crate::fsutil;
use crate::runner::logsink::LineBuffer;
use crate::runner::step::RunCtx;

fn berr(err: bollard::errors::Error) -> CatalystError {
    CatalystError::Container(err.to_string())
}

fn connect() -> Result<Docker> {
    let docker = match std::env::var("DOCKER_HOST") {
        Ok(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
            Docker::connect_with_http_defaults()
        }
        _ => Docker::connect_with_local_defaults(),
    }
    .map_err(berr)?;
    Ok(docker)
}

/// Probe: daemon reachable and answering, unless `NODOCKER` is set
pub async fn available(_ctx: &RunCtx) -> bool {
    if std::env::var_os("NODOCKER").is_some() {
        return false;
    }
    match connect() {
        Ok(docker) => match docker.version().await {
            Ok(_) => true,
            Err(err) => {
                debug!("docker is unavailable: {err}");
                false
            }
        },
        Err(err) => {
            debug!("docker is unavailable: {err}");
            false
        }
    }
}

pub struct DockerService;

async fn image_exists(docker: &Docker, image: &str, platform: &str) -> Result<bool> {
    match docker.inspect_image(image).await {
        Ok(inspect) => {
            if platform.is_empty() || platform == "any" {
                return Ok(true);
            }
            let actual = format!(
                "{}/{}",
                inspect.os.unwrap_or_default(),
                inspect.architecture.unwrap_or_default()
            );
            Ok(actual == platform)
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(false),
        Err(err) => Err(berr(err)),
    }
}

#[async_trait]
impl ContainerService for DockerService {
    async fn image_exists_locally(
        &self,
        ctx: &RunCtx,
        image: &str,
        platform: &str,
    ) -> Result<bool> {
        if ctx.dry_run {
            debug!("docker image inspect {image}");
            return Ok(false);
        }
        image_exists(&connect()?, image, platform).await
    }

    async fn build_image(&self, ctx: &RunCtx, input: &BuildImageInput) -> Result<()> {
        if input.platform.is_empty() {
            info!("🐳 docker build -t {} {}", input.image_tag, input.context_dir.display());
        } else {
            info!(
                "🐳 docker build -t {} --platform {} {}",
                input.image_tag,
                input.platform,
                input.context_dir.display()
            );
        }
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let context = build_context(&input.context_dir)?;
        let options = BuildImageOptions {
            dockerfile: input.dockerfile.clone(),
            t: input.image_tag.clone(),
            rm: true,
            platform: input.platform.clone(),
            ..Default::default()
        };
        let mut stream = docker.build_image(options, None, Some(context.into()));
        while let Some(item) = stream.next().await {
            let item = item.map_err(|err| CatalystError::ImageBuild {
                tag: input.image_tag.clone(),
                details: err.to_string(),
            })?;
            if let Some(line) = item.stream {
                debug!("{}", line.trim_end());
            }
            if let Some(detail) = item.error {
                return Err(CatalystError::ImageBuild {
                    tag: input.image_tag.clone(),
                    details: detail,
                });
            }
        }
        Ok(())
    }

    fn new_container(&self, input: NewContainerInput) -> Box<dyn ContainerHandle> {
        Box::new(DockerContainer {
            input,
            id: Mutex::new(String::new()),
            ids: Mutex::new((0, 0)),
        })
    }
}

/// Tar the build context, honouring `.dockerignore` when present
fn build_context(context_dir: &Path) -> Result<Vec<u8>> {
    let mut sink = fsutil::TarSink::new(Vec::new(), "", 0, 0);
    let src = PathBuf::from(format!("{}/.", context_dir.display()));
    let ignore_file = context_dir.join(".dockerignore");
    if ignore_file.exists() {
        // .dockerignore patterns are close enough to gitignore syntax
        // for the collector's matcher
        let mut builder = ignore::gitignore::GitignoreBuilder::new(context_dir);
        for line in std::fs::read_to_string(&ignore_file)?.lines() {
            let _ = builder.add_line(None, line);
        }
        let matcher = builder
            .build()
            .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?;
        let mut filtered = FilteredSink {
            inner: &mut sink,
            matcher,
        };
        fsutil::FileCollector::new(&src, false).collect(&mut filtered)?;
    } else {
        fsutil::FileCollector::new(&src, false).collect(&mut sink)?;
    }
    sink.finish()
}

struct FilteredSink<'a, W: std::io::Write> {
    inner: &'a mut fsutil::TarSink<W>,
    matcher: ignore::gitignore::Gitignore,
}

impl<W: std::io::Write> fsutil::FileSink for FilteredSink<'_, W> {
    fn write_file(
        &mut self,
        path: &str,
        meta: &fsutil::FileMeta,
        link: Option<&str>,
        contents: Option<&mut dyn std::io::Read>,
    ) -> Result<()> {
        if self.matcher.matched(path, false).is_ignore() {
            return Ok(());
        }
        self.inner.write_file(path, meta, link, contents)
    }
}

pub struct DockerContainer {
    input: NewContainerInput,
    /// Daemon-assigned id once found or created
    id: Mutex<String>,
    /// Container (uid, gid), read back after start
    ids: Mutex<(u64, u64)>,
}

impl DockerContainer {
    fn current_id(&self) -> Option<String> {
        let id = self.id.lock().unwrap();
        (!id.is_empty()).then(|| id.clone())
    }

    async fn find(&self, docker: &Docker) -> Result<Option<String>> {
        if let Some(id) = self.current_id() {
            return Ok(Some(id));
        }
        let containers = docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(berr)?;
        for container in containers {
            let names = container.names.unwrap_or_default();
            if names.iter().any(|n| n.trim_start_matches('/') == self.input.name) {
                let id = container.id.unwrap_or_default();
                *self.id.lock().unwrap() = id.clone();
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    async fn exec_inner(
        &self,
        ctx: &RunCtx,
        docker: &Docker,
        id: &str,
        command: &[String],
        env: &BTreeMap<String, String>,
        user: &str,
        workdir: &str,
        stdout: crate::runner::logsink::LogSink,
        stderr: crate::runner::logsink::LogSink,
    ) -> Result<()> {
        let wd = if workdir.is_empty() {
            self.input.working_dir.clone()
        } else if workdir.starts_with('/') {
            workdir.to_string()
        } else {
            format!("{}/{}", self.input.working_dir, workdir)
        };
        let env_list: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let exec = docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    env: Some(env_list),
                    user: (!user.is_empty()).then(|| user.to_string()),
                    working_dir: (!wd.is_empty()).then_some(wd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    attach_stdin: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(berr)?;

        let results = docker.start_exec(&exec.id, None).await.map_err(berr)?;
        if let StartExecResults::Attached {
            mut output,
            mut input,
        } = results
        {
            let mut out_lines = LineBuffer::new(stdout);
            let mut err_lines = LineBuffer::new(stderr);
            loop {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => {
                        // Forward Ctrl-C into the exec session, then
                        // surface the context error
                        if let Err(err) = input.write_all(&[0x03]).await {
                            warn!("failed to send CTRL+C: {err}");
                        }
                        return Err(CatalystError::Cancelled);
                    }
                    chunk = output.next() => match chunk {
                        Some(Ok(bollard::container::LogOutput::StdErr { message })) => {
                            err_lines.push(&message);
                        }
                        Some(Ok(log)) => {
                            out_lines.push(&log.into_bytes());
                        }
                        Some(Err(err)) => {
                            warn!("exec stream error: {err}");
                            break;
                        }
                        None => break,
                    }
                }
            }
            out_lines.flush();
            err_lines.flush();
        }

        let inspect = docker.inspect_exec(&exec.id).await.map_err(berr)?;
        match inspect.exit_code.unwrap_or(0) {
            0 => Ok(()),
            127 => Err(CatalystError::CommandNotFound),
            code => Err(CatalystError::CommandFailed { code }),
        }
    }

    /// Read the container's uid/gid back for tar ownership. Failures
    /// are tolerated: staging falls back to root ownership.
    async fn try_read_ids(&self, ctx: &RunCtx, docker: &Docker, id: &str) {
        let mut ids = (0u64, 0u64);
        for (opt, slot) in [("-u", 0usize), ("-g", 1)] {
            let capture = CaptureSink::shared();
            let result = self
                .exec_inner(
                    ctx,
                    docker,
                    id,
                    &["id".to_string(), opt.to_string()],
                    &BTreeMap::new(),
                    "",
                    "",
                    capture.clone(),
                    capture.clone(),
                )
                .await;
            if result.is_err() {
                debug!("unable to read container id {opt}");
                return;
            }
            match capture.contents().trim().parse::<u64>() {
                Ok(value) => {
                    if slot == 0 {
                        ids.0 = value;
                    } else {
                        ids.1 = value;
                    }
                }
                Err(_) => {
                    warn!("unable to read id with opt={opt}");
                    return;
                }
            }
        }
        *self.ids.lock().unwrap() = ids;
    }
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    async fn pull(&self, ctx: &RunCtx, force: bool) -> Result<()> {
        info!("🐳 docker pull image={}", self.input.image);
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        if !force && image_exists(&docker, &self.input.image, &self.input.platform).await? {
            debug!("image {} already present", self.input.image);
            return Ok(());
        }
        let auth = match (&self.input.username, &self.input.password) {
            (Some(username), Some(password)) => Some(RegistryAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => stored_auth(&self.input.image),
        };
        debug!(
            "pulling image '{}' from {}",
            self.input.image,
            registry_host(&self.input.image)
        );
        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username),
            password: Some(a.password),
            ..Default::default()
        });
        let mut stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: self.input.image.clone(),
                platform: self.input.platform.clone(),
                ..Default::default()
            }),
            None,
            credentials,
        );
        while let Some(item) = stream.next().await {
            let item = item.map_err(|err| CatalystError::ImagePull {
                image: self.input.image.clone(),
                details: err.to_string(),
            })?;
            if let Some(status) = item.status {
                debug!("{status}");
            }
        }
        Ok(())
    }

    async fn create(&self, ctx: &RunCtx, cap_add: &[String], cap_drop: &[String]) -> Result<()> {
        debug!(
            "🐳 docker create image={} platform={} entrypoint={:?}",
            self.input.image, self.input.platform, self.input.entrypoint
        );
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        if self.find(&docker).await?.is_some() {
            return Ok(());
        }
        let config = Config {
            image: Some(self.input.image.clone()),
            working_dir: (!self.input.working_dir.is_empty())
                .then(|| self.input.working_dir.clone()),
            env: Some(self.input.env.clone()),
            entrypoint: (!self.input.entrypoint.is_empty()).then(|| self.input.entrypoint.clone()),
            cmd: (!self.input.cmd.is_empty()).then(|| self.input.cmd.clone()),
            tty: Some(true),
            host_config: Some(HostConfig {
                binds: Some(self.input.binds.clone()),
                cap_add: (!cap_add.is_empty()).then(|| cap_add.to_vec()),
                cap_drop: (!cap_drop.is_empty()).then(|| cap_drop.to_vec()),
                privileged: Some(self.input.privileged),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: self.input.name.clone(),
            platform: (!self.input.platform.is_empty()).then(|| self.input.platform.clone()),
        };
        let response = docker
            .create_container(Some(options), config)
            .await
            .map_err(|err| CatalystError::ContainerCreate {
                details: err.to_string(),
            })?;
        debug!(
            "created container name={} id={} from image {}",
            self.input.name, response.id, self.input.image
        );
        *self.id.lock().unwrap() = response.id;
        Ok(())
    }

    async fn start(&self, ctx: &RunCtx, attach: bool) -> Result<()> {
        info!("🐳 docker run image={}", self.input.image);
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let id = self
            .find(&docker)
            .await?
            .ok_or_else(|| CatalystError::Container("container not created".into()))?;
        docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
            .map_err(berr)?;
        debug!("started container: {id}");
        if attach {
            self.wait(ctx).await?;
        }
        self.try_read_ids(ctx, &docker, &id).await;
        Ok(())
    }

    async fn wait(&self, ctx: &RunCtx) -> Result<()> {
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let id = self
            .find(&docker)
            .await?
            .ok_or_else(|| CatalystError::Container("container not created".into()))?;
        let mut stream = docker.wait_container(&id, None::<WaitContainerOptions<String>>);
        if let Some(result) = stream.next().await {
            let response = result.map_err(berr)?;
            if response.status_code != 0 {
                return Err(CatalystError::CommandFailed {
                    code: response.status_code,
                });
            }
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
        debug!(
            "🐳 docker exec cmd=[{}] user={user} workdir={workdir}",
            command.join(" ")
        );
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let id = self
            .find(&docker)
            .await?
            .ok_or_else(|| CatalystError::Container("container not created".into()))?;
        self.exec_inner(
            ctx,
            &docker,
            &id,
            command,
            env,
            user,
            workdir,
            self.input.stdout.clone(),
            self.input.stderr.clone(),
        )
        .await
    }

    async fn copy_in(
        &self,
        ctx: &RunCtx,
        container_path: &str,
        host_path: &Path,
        use_gitignore: bool,
    ) -> Result<()> {
        debug!(
            "🐳 docker cp hostPath={} containerPath={container_path}",
            host_path.display()
        );
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let id = self
            .find(&docker)
            .await?
            .ok_or_else(|| CatalystError::Container("container not created".into()))?;

        let metadata = std::fs::metadata(host_path).map_err(|err| CatalystError::CopyDir {
            src: host_path.display().to_string(),
            dst: container_path.to_string(),
            details: err.to_string(),
        })?;
        let tar_bytes = if host_path.extension().is_some_and(|e| e == "tar") {
            std::fs::read(host_path)?
        } else if metadata.is_dir() {
            let (uid, gid) = *self.ids.lock().unwrap();
            let src = host_path.to_path_buf();
            let prefix = container_path.trim_start_matches('/').to_string();
            let tar_path = tokio::task::spawn_blocking(move || {
                fsutil::tar_directory(&src, &prefix, use_gitignore, uid, gid)
            })
            .await
            .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))??;
            let bytes = std::fs::read(&tar_path)?;
            let _ = std::fs::remove_file(&tar_path);
            bytes
        } else {
            return Err(CatalystError::CopyDir {
                src: host_path.display().to_string(),
                dst: container_path.to_string(),
                details: "unsupported host path".into(),
            });
        };

        docker
            .upload_to_container(
                &id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                tar_bytes.into(),
            )
            .await
            .map_err(berr)?;
        Ok(())
    }

    async fn copy_out(&self, ctx: &RunCtx, host_path: &Path, container_path: &str) -> Result<()> {
        debug!(
            "🐳 docker cp containerPath={container_path} hostPath={}",
            host_path.display()
        );
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let id = self
            .find(&docker)
            .await?
            .ok_or_else(|| CatalystError::Container("container not created".into()))?;
        let mut stream = docker.download_from_container(
            &id,
            Some(DownloadFromContainerOptions {
                path: container_path.to_string(),
            }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(berr)?);
        }

        let host_path = host_path.to_path_buf();
        tokio::task::spawn_blocking(move || untar_into(&bytes, &host_path))
            .await
            .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn remove(&self, ctx: &RunCtx) -> Result<()> {
        if ctx.dry_run {
            return Ok(());
        }
        let docker = connect()?;
        let Some(id) = self.find(&docker).await? else {
            return Ok(());
        };
        if let Err(err) = docker
            .remove_container(
                &id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!("failed to remove container: {err}");
        } else {
            debug!("removed container: {id}");
        }
        self.id.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Unpack a tar stream into the host path, creating parents and
/// refusing entries that would escape the destination root.
pub(crate) fn untar_into(bytes: &[u8], host_path: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();
        if rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(CatalystError::PathEscape {
                path: rel.display().to_string(),
            });
        }
        let dest = host_path.join(&rel);
        match entry.header().entry_type() {
            tar::EntryType::Directory => std::fs::create_dir_all(&dest)?,
            tar::EntryType::Regular => {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&dest)?;
                std::io::copy(&mut entry, &mut out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untar_refuses_parent_components() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        let body = b"oops";
        let name = header.as_gnu_mut().unwrap().name.as_mut();
        let escaped = b"../escape.txt";
        name[..escaped.len()].copy_from_slice(escaped);
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &body[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = untar_into(&bytes, dir.path()).unwrap_err();
        assert!(matches!(err, CatalystError::PathEscape { .. }));
    }

    #[test]
    fn untar_recreates_files() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        let body = b"content";
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/file.txt", &body[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        untar_into(&bytes, dir.path()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("nested/file.txt")).unwrap(),
            body
        );
    }
}

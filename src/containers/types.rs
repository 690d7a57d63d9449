//! Container driver contract shared by all backends

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::runner::logsink::{LineSink, LogSink, TracingSink};
use crate::runner::step::RunCtx;
use crate::util::constants::DEFAULT_REGISTRY_HOST;

/// Input for creating a container
#[derive(Clone)]
pub struct NewContainerInput {
    pub image: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub name: String,
    pub stdout: LogSink,
    pub stderr: LogSink,
    pub privileged: bool,
    /// `os/arch`, empty for the daemon default
    pub platform: String,
}

impl NewContainerInput {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            username: None,
            password: None,
            entrypoint: Vec::new(),
            cmd: Vec::new(),
            working_dir: String::new(),
            env: Vec::new(),
            binds: Vec::new(),
            name: name.into(),
            stdout: TracingSink::new(),
            stderr: TracingSink::new(),
            privileged: false,
            platform: String::new(),
        }
    }
}

impl fmt::Debug for NewContainerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewContainerInput")
            .field("image", &self.image)
            .field("name", &self.name)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("binds", &self.binds)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

/// Input for building an image from a Dockerfile
#[derive(Debug, Clone)]
pub struct BuildImageInput {
    pub context_dir: PathBuf,
    pub dockerfile: String,
    pub image_tag: String,
    pub platform: String,
}

/// A container backend: image operations plus container creation
#[async_trait]
pub trait ContainerService: Send + Sync {
    async fn image_exists_locally(&self, ctx: &RunCtx, image: &str, platform: &str)
        -> Result<bool>;
    async fn build_image(&self, ctx: &RunCtx, input: &BuildImageInput) -> Result<()>;
    fn new_container(&self, input: NewContainerInput) -> Box<dyn ContainerHandle>;
}

/// One container's lifecycle. `create` is idempotent: an existing
/// container with the same name is adopted instead of recreated.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    async fn pull(&self, ctx: &RunCtx, force: bool) -> Result<()>;
    async fn create(&self, ctx: &RunCtx, cap_add: &[String], cap_drop: &[String]) -> Result<()>;
    async fn start(&self, ctx: &RunCtx, attach: bool) -> Result<()>;
    async fn wait(&self, ctx: &RunCtx) -> Result<()>;
    /// Run a command inside the container, streaming stdout/stderr
    /// line by line into the environment sinks. Exit code 0 succeeds,
    /// 127 maps to "command not found", anything else to failure.
    async fn exec(
        &self,
        ctx: &RunCtx,
        command: &[String],
        env: &BTreeMap<String, String>,
        user: &str,
        workdir: &str,
    ) -> Result<()>;
    /// Stage a host `.tar` file or directory into the container
    async fn copy_in(
        &self,
        ctx: &RunCtx,
        container_path: &str,
        host_path: &Path,
        use_gitignore: bool,
    ) -> Result<()>;
    /// Extract a container path to the host, refusing escapes
    async fn copy_out(&self, ctx: &RunCtx, host_path: &Path, container_path: &str) -> Result<()>;
    async fn remove(&self, ctx: &RunCtx) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Registry credentials resolved for a pull
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

/// Derive the registry host from an image reference: the first path
/// segment counts as a host when it contains `.` or `:` or is
/// `localhost`; otherwise the default registry applies.
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((head, _)) if head.contains('.') || head.contains(':') || head == "localhost" => head,
        _ => DEFAULT_REGISTRY_HOST,
    }
}

#[derive(Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, DockerConfigAuth>,
}

#[derive(Deserialize)]
struct DockerConfigAuth {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Look up stored credentials for the image's registry in the local
/// container-CLI config file. Missing or unreadable config resolves
/// to no credentials.
pub fn stored_auth(image: &str) -> Option<RegistryAuth> {
    let host = registry_host(image);
    let config_path = std::env::var_os("DOCKER_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".docker")))?
        .join("config.json");
    let raw = std::fs::read(config_path).ok()?;
    let config: DockerConfigFile = serde_json::from_slice(&raw)
        .map_err(|err| warn!("could not parse container config: {err}"))
        .ok()?;
    let entry = config
        .auths
        .iter()
        .find(|(key, _)| key.contains(host))
        .map(|(_, v)| v)?;
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Some(RegistryAuth {
            username: username.clone(),
            password: password.clone(),
        });
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(entry.auth.as_deref()?)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(RegistryAuth {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Sink that accumulates output; used to read back small command
/// results such as `id -u`.
#[derive(Default)]
pub struct CaptureSink {
    buffer: Mutex<String>,
}

impl CaptureSink {
    pub fn shared() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }
}

impl LineSink for CaptureSink {
    fn line(&self, line: &str) {
        self.buffer.lock().unwrap().push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_host_rules() {
        assert_eq!(registry_host("ubuntu:22.04"), DEFAULT_REGISTRY_HOST);
        assert_eq!(registry_host("library/ubuntu"), DEFAULT_REGISTRY_HOST);
        assert_eq!(registry_host("ghcr.io/org/img"), "ghcr.io");
        assert_eq!(registry_host("localhost/img"), "localhost");
        assert_eq!(registry_host("registry:5000/img"), "registry:5000");
        assert_eq!(
            registry_host("public.ecr.aws/c8t2t1h8/al2/curated:1.3"),
            "public.ecr.aws"
        );
    }

    #[test]
    fn capture_sink_accumulates() {
        let sink = CaptureSink::shared();
        sink.line("10");
        sink.line("00\n");
        assert_eq!(sink.contents(), "1000\n");
    }
}

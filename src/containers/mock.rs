//! Mock container backend for tests
//!
//! Records every call in order so tests can assert on the lifecycle
//! without a container runtime present.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::containers::types::{
    BuildImageInput, ContainerHandle, ContainerService, NewContainerInput,
};
use crate::error::{CatalystError, Result};
use crate::runner::step::RunCtx;

/// Shared call journal: one formatted entry per backend call
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct MockService {
    pub calls: CallLog,
    /// Images reported as present locally
    pub local_images: Mutex<Vec<String>>,
    /// Commands (first argument) that should fail with exit 1
    pub failing_commands: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_local_image(self: Arc<Self>, image: &str) -> Arc<Self> {
        self.local_images.lock().unwrap().push(image.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl ContainerService for Arc<MockService> {
    async fn image_exists_locally(
        &self,
        _ctx: &RunCtx,
        image: &str,
        _platform: &str,
    ) -> Result<bool> {
        self.record(format!("image_exists {image}"));
        Ok(self.local_images.lock().unwrap().iter().any(|i| i == image))
    }

    async fn build_image(&self, _ctx: &RunCtx, input: &BuildImageInput) -> Result<()> {
        self.record(format!("build {}", input.image_tag));
        Ok(())
    }

    fn new_container(&self, input: NewContainerInput) -> Box<dyn ContainerHandle> {
        self.record(format!("new_container {} image={}", input.name, input.image));
        Box::new(MockContainer {
            service: Arc::clone(self),
            input,
        })
    }
}

pub struct MockContainer {
    service: Arc<MockService>,
    pub input: NewContainerInput,
}

#[async_trait]
impl ContainerHandle for MockContainer {
    async fn pull(&self, _ctx: &RunCtx, force: bool) -> Result<()> {
        self.service
            .record(format!("pull {} force={force}", self.input.image));
        Ok(())
    }

    async fn create(&self, _ctx: &RunCtx, _cap_add: &[String], _cap_drop: &[String]) -> Result<()> {
        self.service.record(format!("create {}", self.input.name));
        Ok(())
    }

    async fn start(&self, _ctx: &RunCtx, attach: bool) -> Result<()> {
        self.service
            .record(format!("start {} attach={attach}", self.input.name));
        Ok(())
    }

    async fn wait(&self, _ctx: &RunCtx) -> Result<()> {
        self.service.record(format!("wait {}", self.input.name));
        Ok(())
    }

    async fn exec(
        &self,
        _ctx: &RunCtx,
        command: &[String],
        _env: &BTreeMap<String, String>,
        _user: &str,
        workdir: &str,
    ) -> Result<()> {
        self.service
            .record(format!("exec [{}] workdir={workdir}", command.join(" ")));
        let failing = self.service.failing_commands.lock().unwrap();
        if command.first().is_some_and(|c| failing.contains(c)) {
            return Err(CatalystError::CommandFailed { code: 1 });
        }
        Ok(())
    }

    async fn copy_in(
        &self,
        _ctx: &RunCtx,
        container_path: &str,
        host_path: &Path,
        use_gitignore: bool,
    ) -> Result<()> {
        self.service.record(format!(
            "copy_in {container_path} <- {} gitignore={use_gitignore}",
            host_path.display()
        ));
        Ok(())
    }

    async fn copy_out(&self, _ctx: &RunCtx, host_path: &Path, container_path: &str) -> Result<()> {
        self.service.record(format!(
            "copy_out {container_path} -> {}",
            host_path.display()
        ));
        Ok(())
    }

    async fn remove(&self, _ctx: &RunCtx) -> Result<()> {
        self.service.record(format!("remove {}", self.input.name));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

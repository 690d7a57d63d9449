//! ArtifactCreator: collects files an action writes into an artifact
//! directory and zips them up after execution

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{Feature, Gate};
use crate::error::Result;
use crate::fsutil;
use crate::runner::plan::{FileMap, FileMapKind, Plan};
use crate::runner::step::RunCtx;

pub struct ArtifactCreator {
    artifact_dir: PathBuf,
    bind_to: Option<String>,
    env_key: Option<String>,
}

impl ArtifactCreator {
    pub fn new(
        artifact_dir: impl Into<PathBuf>,
        bind_to: Option<String>,
        env_key: Option<String>,
    ) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            bind_to,
            env_key,
        }
    }

    fn zip_path(&self) -> PathBuf {
        let name = self
            .artifact_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.artifact_dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
            .join(format!("{name}.zip"))
    }
}

#[async_trait]
impl Feature for ArtifactCreator {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER ArtifactCreator");
        std::fs::create_dir_all(&self.artifact_dir)?;
        if let Some(env_key) = &self.env_key {
            let value = self
                .bind_to
                .clone()
                .unwrap_or_else(|| self.artifact_dir.display().to_string());
            plan.environment.env.insert(env_key.clone(), value);
        }
        if let Some(bind_to) = &self.bind_to {
            plan.environment.file_maps.push(FileMap::new(
                FileMapKind::Bind,
                &self.artifact_dir,
                bind_to,
            ));
        }
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        let zip_path = self.zip_path();
        match fsutil::zip_directory(&self.artifact_dir, &zip_path) {
            Ok(0) => {
                let _ = std::fs::remove_file(&zip_path);
            }
            Ok(_) => {}
            Err(err) => error!("unable to zip artifact: {err}"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_env_and_zips_contents() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("reports");
        let feature = ArtifactCreator::new(&artifact_dir, None, Some("REPORTS_DIR".to_string()));
        let mut plan = Plan::new("p", "/tmp");

        feature.before(&RunCtx::new(), &mut plan).await.unwrap();
        assert_eq!(
            plan.environment.env.get("REPORTS_DIR"),
            Some(&artifact_dir.display().to_string())
        );

        std::fs::write(artifact_dir.join("out.sarif"), "{}").unwrap();
        feature
            .after(&RunCtx::new(), &mut plan, Ok(()))
            .await
            .unwrap();
        assert!(dir.path().join("reports.zip").exists());
    }

    #[tokio::test]
    async fn empty_artifact_dir_leaves_no_zip() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("reports");
        let feature = ArtifactCreator::new(&artifact_dir, None, None);
        let mut plan = Plan::new("p", "/tmp");

        feature.before(&RunCtx::new(), &mut plan).await.unwrap();
        feature
            .after(&RunCtx::new(), &mut plan, Ok(()))
            .await
            .unwrap();
        assert!(!dir.path().join("reports.zip").exists());
    }

    #[tokio::test]
    async fn bind_adds_a_file_map_and_env_points_at_it() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("reports");
        let feature = ArtifactCreator::new(
            &artifact_dir,
            Some("/reports".to_string()),
            Some("REPORTS_DIR".to_string()),
        );
        let mut plan = Plan::new("p", "/tmp");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();

        assert_eq!(
            plan.environment.env.get("REPORTS_DIR"),
            Some(&"/reports".to_string())
        );
        assert_eq!(
            plan.environment.file_maps,
            vec![FileMap::new(FileMapKind::Bind, &artifact_dir, "/reports")]
        );
    }

    #[tokio::test]
    async fn zips_even_when_inner_failed() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("reports");
        let feature = ArtifactCreator::new(&artifact_dir, None, None);
        let mut plan = Plan::new("p", "/tmp");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();
        std::fs::write(artifact_dir.join("partial.txt"), "x").unwrap();

        let result = feature
            .after(
                &RunCtx::new(),
                &mut plan,
                Err(crate::error::CatalystError::CommandNotFound),
            )
            .await;
        assert!(result.is_err());
        assert!(dir.path().join("reports.zip").exists());
    }
}

//! OutputArtifacts: captures declared artifacts into the on-disk cache
//!
//! The artifact→producer registry entry is recorded at feature
//! construction, synchronously, so consumers can discover producers
//! before any plan has run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::outputs::ArtifactRegistry;
use super::schema::OutputArtifact;
use crate::error::Result;
use crate::features::{Feature, Gate};
use crate::runner::plan::{FileMap, FileMapKind, Plan};
use crate::runner::step::RunCtx;

pub struct OutputArtifacts {
    artifacts: Vec<OutputArtifact>,
    cache_dir: PathBuf,
}

impl OutputArtifacts {
    pub fn new(
        plan_id: &str,
        artifacts: Vec<OutputArtifact>,
        registry: &ArtifactRegistry,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        for artifact in &artifacts {
            registry.insert(artifact.name.clone(), plan_id.to_string());
        }
        Self {
            artifacts,
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl Feature for OutputArtifacts {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER OutputArtifacts");
        let working_base = plan
            .environment
            .working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for artifact in &self.artifacts {
            for pattern in artifact.files.patterns()? {
                let prefix = pattern.split('*').next().unwrap_or_default();
                let base_target = self
                    .cache_dir
                    .join("artifacts")
                    .join(&artifact.name)
                    .join(prefix);
                let target = if pattern.contains('*') {
                    // Wildcards land in a directory target
                    PathBuf::from(format!("{}/", base_target.display()))
                } else {
                    base_target
                };
                plan.environment.file_maps.push(FileMap::new(
                    FileMapKind::CopyOut,
                    Path::new("git/v1").join(&working_base).join(&pattern),
                    target,
                ));
            }
        }
        Ok(Gate::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::schema::Files;
    use dashmap::DashMap;
    use std::sync::Arc;

    fn artifact(name: &str, files: Files) -> OutputArtifact {
        OutputArtifact {
            name: name.to_string(),
            files,
        }
    }

    #[test]
    fn registry_is_populated_at_construction() {
        let registry: ArtifactRegistry = Arc::new(DashMap::new());
        let _feature = OutputArtifacts::new(
            "Build",
            vec![artifact("dist", Files::One("build/**".into()))],
            &registry,
            "/cache",
        );
        assert_eq!(
            registry.get("dist").map(|v| v.value().clone()),
            Some("Build".to_string())
        );
    }

    #[tokio::test]
    async fn wildcard_patterns_target_directories() {
        let registry: ArtifactRegistry = Arc::new(DashMap::new());
        let feature = OutputArtifacts::new(
            "Build",
            vec![artifact("dist", Files::One("out/*.tar".into()))],
            &registry,
            "/cache",
        );
        let mut plan = Plan::new("Build", "/home/bob/myrepo");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();

        assert_eq!(
            plan.environment.file_maps,
            vec![FileMap::new(
                FileMapKind::CopyOut,
                "git/v1/myrepo/out/*.tar",
                "/cache/artifacts/dist/out/",
            )]
        );
    }

    #[tokio::test]
    async fn plain_file_patterns_target_files() {
        let registry: ArtifactRegistry = Arc::new(DashMap::new());
        let feature = OutputArtifacts::new(
            "Build",
            vec![artifact("report", Files::One("report.xml".into()))],
            &registry,
            "/cache",
        );
        let mut plan = Plan::new("Build", "/home/bob/myrepo");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();

        assert_eq!(
            plan.environment.file_maps,
            vec![FileMap::new(
                FileMapKind::CopyOut,
                "git/v1/myrepo/report.xml",
                "/cache/artifacts/report/report.xml",
            )]
        );
    }

    #[tokio::test]
    async fn list_files_produce_one_map_each() {
        let registry: ArtifactRegistry = Arc::new(DashMap::new());
        let feature = OutputArtifacts::new(
            "Build",
            vec![artifact(
                "bundle",
                Files::Many(vec!["a.txt".into(), "lib/*".into()]),
            )],
            &registry,
            "/cache",
        );
        let mut plan = Plan::new("Build", "/home/bob/myrepo");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();
        assert_eq!(plan.environment.file_maps.len(), 2);
    }
}

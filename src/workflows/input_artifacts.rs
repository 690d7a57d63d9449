//! InputArtifacts: wires artifacts produced by other plans into this
//! plan's environment
//!
//! Consumed artifacts arrive at sequential `s3/NN` mounts. A missing
//! registry entry or a producing plan not yet in `depends_on` defers
//! the plan; the dependency gate then waits for the producer.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::outputs::ArtifactRegistry;
use crate::error::{CatalystError, Result};
use crate::features::{Feature, Gate};
use crate::runner::plan::{FileMap, FileMapKind, Plan};
use crate::runner::step::RunCtx;

pub struct InputArtifacts {
    artifacts: Vec<String>,
    registry: ArtifactRegistry,
    cache_dir: PathBuf,
}

impl InputArtifacts {
    pub fn new(
        artifacts: Vec<String>,
        registry: ArtifactRegistry,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            artifacts,
            registry,
            cache_dir: cache_dir.into(),
        }
    }
}

#[async_trait]
impl Feature for InputArtifacts {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER InputArtifacts");
        for (i, artifact) in self.artifacts.iter().enumerate() {
            let Some(producer) = self.registry.get(artifact).map(|p| p.value().clone()) else {
                debug!("DEFER - no plan started yet for artifact {artifact}");
                return Err(CatalystError::Deferred);
            };
            if !plan.depends_on.contains(&producer) {
                debug!("DEFER - waiting for plan {producer} to provide artifact {artifact}");
                plan.add_depends_on(producer);
                return Err(CatalystError::Deferred);
            }
            let target = format!("s3/{:02}", i + 1);
            plan.environment
                .env
                .insert(format!("CATALYST_SOURCE_DIR_{artifact}"), target.clone());
            let map = FileMap::new(
                FileMapKind::CopyIn,
                format!(
                    "{}/.",
                    self.cache_dir.join("artifacts").join(artifact).display()
                ),
                target,
            );
            // Deferral re-enters this hook; don't stage twice
            if !plan.environment.file_maps.contains(&map) {
                plan.environment.file_maps.push(map);
            }
        }
        debug!("env: {:?}", plan.environment.env);
        Ok(Gate::Run)
    }
}

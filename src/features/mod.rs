//! Feature pipeline: composable pre/post concerns around the plan runner
//!
//! A feature wraps the plan execution with `before`/`after` hooks. The
//! pipeline driver (see [`crate::runner::scheduler`]) enters features
//! in list order — the first feature is outermost — runs the plan
//! runner once every `before` admitted, then unwinds `after` hooks in
//! reverse for exactly the features that were entered. Returning the
//! `Deferred` error kind from `before` suspends the plan without
//! reaching the runner; a feature never runs the inner step twice.

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

mod artifact_creator;
mod depends_on;
mod dryrun;
mod logger;
mod reuse;
mod sbom_detector;
mod status_logger;
mod workingdir_importer;

pub use artifact_creator::ArtifactCreator;
pub use depends_on::DependsOn;
pub use dryrun::Dryrun;
pub use logger::ConsoleLogger;
pub use reuse::Reuse;
pub use sbom_detector::{Sbom, SbomDetector, SbomType};
pub use status_logger::StatusLogger;
pub use workingdir_importer::WorkingDirImporter;

/// Outcome of a feature's `before` hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Continue into the next feature (and ultimately the plan runner)
    Run,
    /// Succeed without running anything further inside this feature
    Skip,
}

/// A composable wrapper around the plan runner.
///
/// `before` may mutate the plan's environment, add dependencies, defer
/// (by returning the `Deferred` error kind) or skip the inner step.
/// `after` observes or transforms the inner result; it only runs for
/// features whose `before` returned `Gate::Run`.
#[async_trait]
pub trait Feature: Send + Sync {
    async fn before(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        result
    }
}

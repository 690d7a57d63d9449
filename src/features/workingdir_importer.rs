//! WorkingDirImporter: stages the working tree into the execution
//! environment
//!
//! Either binds the working directory live, or copies it in honouring
//! gitignore rules. Under shared compute the first plan seeds a
//! per-workflow source cache that later plans import from, and every
//! plan copies the tree back out to that cache on close.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Feature, Gate};
use crate::error::Result;
use crate::runner::plan::{FileMap, FileMapKind, Plan};
use crate::runner::step::RunCtx;

pub struct WorkingDirImporter {
    working_dir: PathBuf,
    cache_dir: PathBuf,
    bind: bool,
    shared: bool,
    /// Set by the first plan through the gate (shared compute only)
    working_dir_seeded: Arc<AtomicBool>,
}

impl WorkingDirImporter {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        bind: bool,
        shared: bool,
        working_dir_seeded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            cache_dir: cache_dir.into(),
            bind,
            shared,
            working_dir_seeded,
        }
    }
}

fn with_dot(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}/.", path.display()))
}

#[async_trait]
impl Feature for WorkingDirImporter {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!(
            "ENTER WorkingDirImporter workingDir={} bind={} shared={}",
            self.working_dir.display(),
            self.bind,
            self.shared
        );
        let working_dir = if self.working_dir.is_absolute() {
            self.working_dir.clone()
        } else {
            std::env::current_dir()?.join(&self.working_dir)
        };
        let basename = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = Path::new("git/v1").join(&basename);

        let maps = &mut plan.environment.file_maps;
        if self.bind {
            maps.push(FileMap::new(FileMapKind::Bind, &working_dir, &target));
        } else if self.shared {
            let source_cache = self.cache_dir.join("sources").join("WorkflowSource");
            if !self.working_dir_seeded.swap(true, Ordering::SeqCst) {
                maps.push(FileMap::new(
                    FileMapKind::CopyInWithGitignore,
                    with_dot(&working_dir),
                    &target,
                ));
            } else {
                maps.push(FileMap::new(
                    FileMapKind::CopyInWithGitignore,
                    with_dot(&source_cache),
                    &target,
                ));
            }
            maps.push(FileMap::new(
                FileMapKind::CopyOut,
                with_dot(&target),
                &source_cache,
            ));
        } else {
            maps.push(FileMap::new(
                FileMapKind::CopyInWithGitignore,
                with_dot(&working_dir),
                &target,
            ));
        }
        plan.environment.env.insert(
            "CATALYST_SOURCE_DIR_WorkflowSource".to_string(),
            format!("git/v1/{basename}"),
        );
        Ok(Gate::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn importer(bind: bool, shared: bool, seeded: &Arc<AtomicBool>) -> WorkingDirImporter {
        WorkingDirImporter::new(
            "/home/bob/myrepo",
            "/cache",
            bind,
            shared,
            Arc::clone(seeded),
        )
    }

    #[tokio::test]
    async fn copies_working_tree_by_default() {
        let seeded = Arc::new(AtomicBool::new(false));
        let mut plan = Plan::new("p", "/home/bob/myrepo");
        importer(false, false, &seeded)
            .before(&RunCtx::new(), &mut plan)
            .await
            .unwrap();

        assert_eq!(
            plan.environment.file_maps,
            vec![FileMap::new(
                FileMapKind::CopyInWithGitignore,
                "/home/bob/myrepo/.",
                "git/v1/myrepo",
            )]
        );
        assert_eq!(
            plan.environment.env.get("CATALYST_SOURCE_DIR_WorkflowSource"),
            Some(&"git/v1/myrepo".to_string())
        );
    }

    #[tokio::test]
    async fn bind_mode_binds_instead() {
        let seeded = Arc::new(AtomicBool::new(false));
        let mut plan = Plan::new("p", "/home/bob/myrepo");
        importer(true, false, &seeded)
            .before(&RunCtx::new(), &mut plan)
            .await
            .unwrap();
        assert_eq!(
            plan.environment.file_maps,
            vec![FileMap::new(
                FileMapKind::Bind,
                "/home/bob/myrepo",
                "git/v1/myrepo",
            )]
        );
    }

    #[tokio::test]
    async fn shared_compute_seeds_then_reads_the_cache() {
        let seeded = Arc::new(AtomicBool::new(false));

        // First plan copies from the working tree
        let mut first = Plan::new("p1", "/home/bob/myrepo");
        importer(false, true, &seeded)
            .before(&RunCtx::new(), &mut first)
            .await
            .unwrap();
        assert_eq!(
            first.environment.file_maps,
            vec![
                FileMap::new(
                    FileMapKind::CopyInWithGitignore,
                    "/home/bob/myrepo/.",
                    "git/v1/myrepo",
                ),
                FileMap::new(
                    FileMapKind::CopyOut,
                    "git/v1/myrepo/.",
                    "/cache/sources/WorkflowSource",
                ),
            ]
        );

        // Later plans import from the seeded cache
        let mut second = Plan::new("p2", "/home/bob/myrepo");
        importer(false, true, &seeded)
            .before(&RunCtx::new(), &mut second)
            .await
            .unwrap();
        assert_eq!(
            second.environment.file_maps[0],
            FileMap::new(
                FileMapKind::CopyInWithGitignore,
                "/cache/sources/WorkflowSource/.",
                "git/v1/myrepo",
            )
        );
        assert_eq!(
            second.environment.file_maps[1],
            FileMap::new(
                FileMapKind::CopyOut,
                "git/v1/myrepo/.",
                "/cache/sources/WorkflowSource",
            )
        );
    }
}

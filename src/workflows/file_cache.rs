//! FileCache: restores cached directories into the execution
//! environment and captures them back on close
//!
//! A cache hit whose entry resolves to a directory is bound live;
//! anything else is copied in. Either way a copy-out captures the
//! container path back into the cache at completion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::schema::FileCachingEntry;
use crate::error::Result;
use crate::features::{Feature, Gate};
use crate::runner::plan::{FileMap, FileMapKind, Plan};
use crate::runner::step::RunCtx;

pub struct FileCache {
    working_dir: PathBuf,
    entries: BTreeMap<String, FileCachingEntry>,
    cache_dir: PathBuf,
}

impl FileCache {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        entries: BTreeMap<String, FileCachingEntry>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            entries,
            cache_dir: cache_dir.into(),
        }
    }
}

fn basename(path: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Feature for FileCache {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER FileCache");
        let container_working_dir = Path::new("git/v1").join(
            self.working_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        for (key, entry) in &self.entries {
            let cache_path = self.cache_dir.join("caches").join(key);
            let container_source_path = if entry.path.starts_with('/') {
                PathBuf::from(&entry.path)
            } else {
                container_working_dir.join(&entry.path)
            };
            let container_target_path = format!(
                "{}/",
                container_source_path
                    .parent()
                    .unwrap_or(Path::new(""))
                    .display()
            );

            match std::fs::metadata(&cache_path) {
                Ok(_) => {
                    debug!("📦 Restoring from cache {}", cache_path.display());
                    let restored = cache_path.join(basename(&entry.path));
                    if restored.is_dir() {
                        plan.environment.file_maps.push(FileMap::new(
                            FileMapKind::Bind,
                            &restored,
                            &container_source_path,
                        ));
                    } else {
                        plan.environment.file_maps.push(FileMap::new(
                            FileMapKind::CopyIn,
                            format!("{}/.", cache_path.display()),
                            container_target_path,
                        ));
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            plan.environment.file_maps.push(FileMap::new(
                FileMapKind::CopyOut,
                &container_source_path,
                format!("{}/", cache_path.display()),
            ));
        }
        Ok(Gate::Run)
    }
}

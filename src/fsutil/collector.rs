//! File collector: walks a source tree into a sink
//!
//! Regular files and symlinks are emitted once each; directories are
//! not emitted and empty directories disappear. When a gitignore
//! matcher is in play, a file is skipped only if it is not tracked in
//! the local git index — tracked files always travel. Submodule
//! entries (gitlinks) are recursed into as independent roots.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{CatalystError, Result};
use crate::fsutil::git_index::GitIndex;
use crate::fsutil::sinks::{FileMeta, FileSink};

pub struct FileCollector {
    /// Directory being collected. A trailing `/.` collects the
    /// directory's contents without its basename.
    src_path: PathBuf,
    /// Prefix stripped from walked paths to form sink-relative paths
    src_prefix: PathBuf,
    ignorer: Option<Gitignore>,
}

impl FileCollector {
    pub fn new(src_path: impl Into<PathBuf>, use_gitignore: bool) -> Self {
        let (root, prefix) = split_src(&src_path.into());
        let ignorer = if use_gitignore {
            Some(build_ignorer(&root))
        } else {
            None
        };
        Self {
            src_path: root,
            src_prefix: prefix,
            ignorer,
        }
    }

    /// Walk the tree and feed every collected file to the sink
    pub fn collect(&self, sink: &mut dyn FileSink) -> Result<()> {
        self.walk_root(&self.src_path, &[], sink)
    }

    fn walk_root(&self, root: &Path, submodule: &[String], sink: &mut dyn FileSink) -> Result<()> {
        let index = GitIndex::open(root);
        let mut it = WalkDir::new(root).sort_by_file_name().into_iter();
        while let Some(entry) = it.next() {
            let entry = entry.map_err(|e| CatalystError::Collect {
                path: root.display().to_string(),
                details: e.to_string(),
            })?;
            let path = entry.path();
            // Roots are skipped unless the source is a single file
            if path == root && entry.file_type().is_dir() {
                continue;
            }
            let rel = path
                .strip_prefix(&self.src_prefix)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            // Path relative to the current (sub)root, used for index lookups
            let index_rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let file_type = entry.file_type();
            let tracked = index.as_ref().is_some_and(|i| i.contains(&index_rel));

            if file_type.is_dir() {
                if let Some(index) = &index {
                    if index.is_submodule(&index_rel) {
                        let mut sub = submodule.to_vec();
                        sub.push(index_rel.clone());
                        self.walk_root(path, &sub, sink)?;
                        it.skip_current_dir();
                        continue;
                    }
                }
                if self.is_ignored(path, true) && !tracked {
                    // Descend anyway when tracked entries live below
                    let keeps_tracked = index
                        .as_ref()
                        .is_some_and(|i| i.has_entries_under(&index_rel));
                    if !keeps_tracked {
                        trace!("pruning ignored dir {rel}");
                        it.skip_current_dir();
                    }
                }
                continue;
            }

            if !tracked && self.is_ignored(path, false) {
                trace!("skipping ignored file {rel}");
                continue;
            }

            if file_type.is_symlink() {
                let target = fs::read_link(path)?;
                let meta = FileMeta::from_std(&entry.metadata().map_err(io_other)?);
                sink.write_file(&rel, &meta, Some(&target.to_string_lossy()), None)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let meta = FileMeta::from_std(&entry.metadata().map_err(io_other)?);
            let mut reader = fs::File::open(path)?;
            sink.write_file(&rel, &meta, None, Some(&mut reader))?;
        }
        Ok(())
    }

    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.ignorer
            .as_ref()
            .is_some_and(|ig| ig.matched_path_or_any_parents(path, is_dir).is_ignore())
    }
}

fn io_other(e: walkdir::Error) -> CatalystError {
    CatalystError::Io(std::io::Error::other(e.to_string()))
}

/// Split a source path into (walk root, strip prefix). A trailing
/// `/.` collects contents directly; otherwise the basename travels.
fn split_src(src: &Path) -> (PathBuf, PathBuf) {
    let raw = src.to_string_lossy();
    if let Some(stripped) = raw.strip_suffix("/.") {
        let root = PathBuf::from(stripped);
        (root.clone(), root)
    } else {
        let prefix = src.parent().map(Path::to_path_buf).unwrap_or_default();
        (src.to_path_buf(), prefix)
    }
}

/// Gather `.gitignore` patterns under the root, nested files included
fn build_ignorer(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for entry in WalkDir::new(root).into_iter().flatten() {
        if entry.file_type().is_file() && entry.file_name() == ".gitignore" {
            if let Some(err) = builder.add(entry.path()) {
                debug!("error loading {}: {err}", entry.path().display());
            }
        }
    }
    builder.build().unwrap_or_else(|err| {
        debug!("error building gitignore matcher: {err}");
        Gitignore::empty()
    })
}

/// Copy a directory tree through the collector, honouring gitignore
/// rules when requested. Fails when source and destination coincide.
pub fn copy_dir(dest: &Path, source: &Path, use_gitignore: bool) -> Result<()> {
    if dest == source {
        return Err(CatalystError::CopyDir {
            src: source.display().to_string(),
            dst: dest.display().to_string(),
            details: "source and destination are the same".into(),
        });
    }
    debug!("copying from {} to {}", source.display(), dest.display());
    let mut sink = crate::fsutil::sinks::CopySink::new(dest);
    FileCollector::new(source, use_gitignore).collect(&mut sink)
}

//! File staging: tree walking with gitignore/index awareness and
//! tar / copy / zip destination sinks

pub mod collector;
pub mod git_index;
pub mod sinks;

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::util::paths;

pub use collector::{copy_dir, FileCollector};
pub use sinks::{zip_directory, CopySink, FileMeta, FileSink, TarSink, ZipSink};

/// Tar a directory into a temp file under the state tmp dir, with each
/// entry prefixed by `dst_dir` (a container path without its leading
/// slash). The caller removes the file when done.
pub fn tar_directory(
    src_path: &Path,
    dst_dir: &str,
    use_gitignore: bool,
    uid: u64,
    gid: u64,
) -> Result<PathBuf> {
    let tar_path = tempfile::Builder::new()
        .prefix("tardir")
        .suffix(".tar")
        .tempfile_in(paths::tmp_dir())?
        .keep()
        .map_err(|e| crate::error::CatalystError::Io(e.error))?
        .1;
    let file = File::create(&tar_path)?;
    let mut sink = TarSink::new(file, dst_dir, uid, gid);
    FileCollector::new(src_path, use_gitignore).collect(&mut sink)?;
    sink.finish()?;
    Ok(tar_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tar_directory_prefixes_container_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bundle");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("data.txt"), "42").unwrap();

        let tar_path = tar_directory(&src, "codecatalyst/output/src", false, 0, 0).unwrap();
        let bytes = std::fs::read(&tar_path).unwrap();
        std::fs::remove_file(&tar_path).unwrap();

        let mut archive = tar::Archive::new(Cursor::new(bytes));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["codecatalyst/output/src/bundle/data.txt"]);
    }
}

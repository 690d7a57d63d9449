//! Destination sinks for the file collector

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use zip::write::SimpleFileOptions;

use crate::error::Result;

/// Metadata carried alongside each collected file
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub mode: u32,
    pub mtime: SystemTime,
    pub size: u64,
}

impl FileMeta {
    pub fn from_std(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let mode = 0o644;
        Self {
            mode,
            mtime: meta.modified().unwrap_or(UNIX_EPOCH),
            size: meta.len(),
        }
    }

    fn mtime_secs(&self) -> u64 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Receives collected files one at a time. `contents` is `None` for
/// symlinks, which carry only their `link` target.
pub trait FileSink {
    fn write_file(
        &mut self,
        path: &str,
        meta: &FileMeta,
        link: Option<&str>,
        contents: Option<&mut dyn Read>,
    ) -> Result<()>;
}

/// Streams files into a tar archive, prefixing each path with
/// `dst_dir` and overriding uid/gid as configured.
pub struct TarSink<W: Write> {
    builder: tar::Builder<W>,
    uid: u64,
    gid: u64,
    dst_dir: String,
}

impl<W: Write> TarSink<W> {
    pub fn new(writer: W, dst_dir: impl Into<String>, uid: u64, gid: u64) -> Self {
        Self {
            builder: tar::Builder::new(writer),
            uid,
            gid,
            dst_dir: dst_dir.into(),
        }
    }

    pub fn finish(mut self) -> Result<W> {
        Ok(self.builder.into_inner()?)
    }

    fn entry_path(&self, path: &str) -> String {
        if self.dst_dir.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.dst_dir.trim_end_matches('/'), path)
        }
    }
}

impl<W: Write> FileSink for TarSink<W> {
    fn write_file(
        &mut self,
        path: &str,
        meta: &FileMeta,
        link: Option<&str>,
        contents: Option<&mut dyn Read>,
    ) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_mode(meta.mode);
        header.set_mtime(meta.mtime_secs());
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        let entry_path = self.entry_path(path);
        match (link, contents) {
            (Some(target), _) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                self.builder.append_link(&mut header, entry_path, target)?;
            }
            (None, Some(reader)) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(meta.size);
                self.builder.append_data(&mut header, entry_path, reader)?;
            }
            (None, None) => {}
        }
        Ok(())
    }
}

/// Recreates the collected tree under a destination directory,
/// preserving file modes; directories are created 0755.
pub struct CopySink {
    dst_dir: PathBuf,
}

impl CopySink {
    pub fn new(dst_dir: impl Into<PathBuf>) -> Self {
        Self {
            dst_dir: dst_dir.into(),
        }
    }
}

impl FileSink for CopySink {
    fn write_file(
        &mut self,
        path: &str,
        meta: &FileMeta,
        link: Option<&str>,
        contents: Option<&mut dyn Read>,
    ) -> Result<()> {
        let dest = self.dst_dir.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match (link, contents) {
            (Some(target), _) => {
                #[cfg(unix)]
                {
                    if dest.symlink_metadata().is_ok() {
                        fs::remove_file(&dest)?;
                    }
                    std::os::unix::fs::symlink(target, &dest)?;
                }
                #[cfg(not(unix))]
                let _ = target;
            }
            (None, Some(reader)) => {
                let mut out = fs::File::create(&dest)?;
                std::io::copy(reader, &mut out)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&dest, fs::Permissions::from_mode(meta.mode))?;
                }
            }
            (None, None) => {}
        }
        let _ = meta;
        Ok(())
    }
}

/// Writes collected files into a zip archive
pub struct ZipSink<W: Write + std::io::Seek> {
    writer: zip::ZipWriter<W>,
    count: usize,
}

impl<W: Write + std::io::Seek> ZipSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: zip::ZipWriter::new(writer),
            count: 0,
        }
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(self) -> Result<W> {
        Ok(self.writer.finish()?)
    }
}

impl<W: Write + std::io::Seek> FileSink for ZipSink<W> {
    fn write_file(
        &mut self,
        path: &str,
        meta: &FileMeta,
        link: Option<&str>,
        contents: Option<&mut dyn Read>,
    ) -> Result<()> {
        // Zip archives carry no symlinks here; only regular files land
        // in artifact zips.
        if link.is_some() {
            return Ok(());
        }
        let options = SimpleFileOptions::default().unix_permissions(meta.mode);
        self.writer.start_file(path, options)?;
        if let Some(reader) = contents {
            std::io::copy(reader, &mut self.writer)?;
        }
        self.count += 1;
        Ok(())
    }
}

/// Convenience: zip the contents of a directory into `zip_path`.
/// Returns the number of files written; an empty directory produces an
/// empty archive the caller may want to delete.
pub fn zip_directory(dir: &Path, zip_path: &Path) -> Result<usize> {
    let file = fs::File::create(zip_path)?;
    let mut sink = ZipSink::new(file);
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let meta = FileMeta::from_std(&entry.metadata().map_err(|e| std::io::Error::other(e.to_string()))?);
        let mut reader = fs::File::open(entry.path())?;
        sink.write_file(&rel, &meta, None, Some(&mut reader))?;
    }
    let written = sink.len();
    sink.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn meta(mode: u32, size: u64) -> FileMeta {
        FileMeta {
            mode,
            mtime: UNIX_EPOCH,
            size,
        }
    }

    #[test]
    fn tar_sink_prefixes_dst_dir() {
        let mut sink = TarSink::new(Vec::new(), "stage/src", 1000, 1000);
        let body = b"fn main() {}\n";
        sink.write_file(
            "repo/main.rs",
            &meta(0o644, body.len() as u64),
            None,
            Some(&mut &body[..]),
        )
        .unwrap();
        let bytes = sink.finish().unwrap();

        let mut archive = tar::Archive::new(Cursor::new(bytes));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_string_lossy(),
            "stage/src/repo/main.rs"
        );
        assert_eq!(entry.header().uid().unwrap(), 1000);
        assert_eq!(entry.header().mode().unwrap(), 0o644);
    }

    #[test]
    fn tar_sink_preserves_symlinks() {
        let mut sink = TarSink::new(Vec::new(), "", 0, 0);
        sink.write_file("repo/link", &meta(0o777, 0), Some("target.txt"), None)
            .unwrap();
        let bytes = sink.finish().unwrap();

        let mut archive = tar::Archive::new(Cursor::new(bytes));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            entry.link_name().unwrap().unwrap().to_string_lossy(),
            "target.txt"
        );
    }

    #[test]
    fn copy_sink_recreates_tree_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CopySink::new(dir.path());
        let body = b"#!/bin/sh\n";
        sink.write_file(
            "repo/bin/run.sh",
            &meta(0o755, body.len() as u64),
            None,
            Some(&mut &body[..]),
        )
        .unwrap();

        let dest = dir.path().join("repo/bin/run.sh");
        assert_eq!(fs::read(&dest).unwrap(), body);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o777, 0o755);
        }
    }

    #[test]
    fn zip_directory_counts_files_and_skips_dirs() {
        let out = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("sub/b.txt"), "b").unwrap();
        let zip_path = out.path().join("out.zip");
        assert_eq!(zip_directory(dir.path(), &zip_path).unwrap(), 2);

        let file = fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"sub/b.txt".to_string()));
    }
}

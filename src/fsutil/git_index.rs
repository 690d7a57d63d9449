//! Minimal `.git/index` reader
//!
//! The file collector needs two facts from the index: whether a path
//! is tracked (tracked files are collected even when `.gitignore`
//! would exclude them) and whether an entry is a submodule gitlink.
//! Index versions 2 and 3 are parsed; anything else is treated as "no
//! index", which degrades to plain gitignore behaviour.

use std::collections::HashMap;
use std::path::Path;

/// Gitlink (submodule) entry mode
const MODE_GITLINK: u32 = 0o160000;

pub struct GitIndex {
    /// path → raw entry mode
    entries: HashMap<String, u32>,
}

impl GitIndex {
    /// Open the index of the repository rooted at `repo_dir`.
    /// Returns `None` when there is no readable, supported index.
    pub fn open(repo_dir: &Path) -> Option<Self> {
        let data = std::fs::read(repo_dir.join(".git").join("index")).ok()?;
        Self::parse(&data)
    }

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 12 || &data[0..4] != b"DIRC" {
            return None;
        }
        let version = u32::from_be_bytes(data[4..8].try_into().ok()?);
        if version != 2 && version != 3 {
            return None;
        }
        let count = u32::from_be_bytes(data[8..12].try_into().ok()?) as usize;

        let mut entries = HashMap::with_capacity(count);
        let mut offset = 12usize;
        for _ in 0..count {
            // Fixed portion: stat data (40) + sha (20) + flags (2)
            if data.len() < offset + 62 {
                return None;
            }
            let mode = u32::from_be_bytes(data[offset + 24..offset + 28].try_into().ok()?);
            let flags = u16::from_be_bytes(data[offset + 60..offset + 62].try_into().ok()?);
            let mut header_len = 62;
            // Version 3 adds 2 bytes of extended flags when bit 14 is set
            if version == 3 && flags & 0x4000 != 0 {
                header_len += 2;
            }
            let path_start = offset + header_len;
            let nul = data[path_start..].iter().position(|&b| b == 0)?;
            let path = String::from_utf8_lossy(&data[path_start..path_start + nul]).into_owned();
            entries.insert(path, mode);

            // Entries are nul-padded to a multiple of 8 bytes
            let entry_len = header_len + nul;
            offset += entry_len + (8 - entry_len % 8);
        }
        Some(Self { entries })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_submodule(&self, path: &str) -> bool {
        self.entries.get(path) == Some(&MODE_GITLINK)
    }

    /// True when any tracked entry lives under the given directory
    pub fn has_entries_under(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.entries.keys().any(|p| p.starts_with(&prefix))
    }
}

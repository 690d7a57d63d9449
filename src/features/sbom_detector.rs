//! SbomDetector: finds SBOM documents written by an action
//!
//! After a successful run, small JSON files in the report directory
//! whose top-level object carries an `spdxVersion` or `SPDXID` key are
//! loaded into the provided SBOM slot.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Feature;
use crate::error::Result;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;
use crate::util::constants::MAX_SBOM_SIZE;

/// Currently only SPDX is recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomType {
    Spdx,
}

impl SbomType {
    pub fn as_url(&self) -> &'static str {
        match self {
            Self::Spdx => "https://spdx.dev/Document",
        }
    }
}

/// A detected software bill of materials
#[derive(Debug, Clone)]
pub struct Sbom {
    pub kind: SbomType,
    pub content: Vec<u8>,
}

pub struct SbomDetector {
    directory: PathBuf,
    slot: Arc<Mutex<Option<Sbom>>>,
}

impl SbomDetector {
    pub fn new(directory: impl Into<PathBuf>, slot: Arc<Mutex<Option<Sbom>>>) -> Self {
        Self {
            directory: directory.into(),
            slot,
        }
    }

    fn detect(&self) -> Result<()> {
        for entry in walkdir::WalkDir::new(&self.directory).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > MAX_SBOM_SIZE {
                debug!(
                    "skipping potential SBOM '{}' - too large ({size} > {MAX_SBOM_SIZE})",
                    path.display()
                );
                continue;
            }
            let content = match std::fs::read(path) {
                Ok(content) => content,
                Err(err) => {
                    warn!("unable to read potential SBOM '{}': {err}", path.display());
                    continue;
                }
            };
            let Ok(data) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(
                &content,
            ) else {
                debug!("skipping non-JSON candidate '{}'", path.display());
                continue;
            };
            if data
                .keys()
                .any(|k| k.eq_ignore_ascii_case("spdxVersion") || k.eq_ignore_ascii_case("SPDXID"))
            {
                debug!("found SBOM '{}'", path.display());
                *self.slot.lock().unwrap() = Some(Sbom {
                    kind: SbomType::Spdx,
                    content,
                });
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Feature for SbomDetector {
    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        result?;
        self.detect()?;
        Ok(())
    }
}

//! Remote action download
//!
//! Known actions are pinned to published versions and fetched as zip
//! bundles from the public action source bucket, cached under the
//! state directory keyed by the download URL.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::info;

use crate::actions::schema::{self, ActionSpec};
use crate::error::{CatalystError, Result};
use crate::util::paths;

pub const ACTIONS_URL_TEMPLATE: &str =
    "https://amazon-codecatalyst-public-action-source-us-west-2.s3.us-west-2.amazonaws.com/us-west-2/{id}/{version}/action-repo.zip";

/// Registry of known remote actions and their pinned versions
pub fn action_versions() -> &'static BTreeMap<&'static str, &'static str> {
    static VERSIONS: OnceLock<BTreeMap<&'static str, &'static str>> = OnceLock::new();
    VERSIONS.get_or_init(|| {
        BTreeMap::from([
            ("aws/kubernetes-deploy", "1.0.0"),
            ("aws/ecs-render-task-definition", "1.0.4"),
            ("aws/cfn-deploy", "1.0.5"),
            ("aws/ecs-deploy", "1.0.5"),
            ("aws/cdk-deploy", "1.0.13"),
            ("aws/cdk-bootstrap", "1.0.8"),
            ("aws/s3-publish", "1.0.5"),
            ("aws/lambda-invoke", "1.0.8"),
            ("codecatalyst-labs/provision-with-terraform-community", "1.0.0"),
            ("codecatalyst-labs/scan-with-codeguru-security", "1.0.0"),
            ("codecatalyst-labs/deploy-to-cloudfront-s3", "1.0.1"),
            ("codecatalyst-labs/publish-to-codeartifact", "1.0.1"),
            ("codecatalyst-labs/invalidate-cloudfront-cache", "1.0.0"),
            ("codecatalyst-labs/publish-to-sns", "1.0.0"),
            ("codecatalyst-labs/deploy-to-app-runner", "1.0.3"),
            ("codecatalyst-labs/outgoing-webhook", "1.0.1"),
            ("codecatalyst-labs/deploy-with-sam", "1.0.1"),
            ("codecatalyst-labs/push-to-ecr", "1.0.3"),
            ("codecatalyst-labs/deploy-to-amplify-hosting", "1.0.1"),
            ("mend/mendsca", "1.0.9"),
        ])
    })
}

pub fn action_url(action_id: &str, version: &str) -> String {
    ACTIONS_URL_TEMPLATE
        .replace("{id}", action_id)
        .replace("{version}", version)
}

/// Download and load a known remote action. The cache dir is rebuilt
/// on every call so a fresh bundle always wins.
pub async fn load_remote_action(action_id: &str) -> Result<ActionSpec> {
    let Some(version) = action_versions().get(action_id) else {
        return Err(CatalystError::UnknownAction {
            identifier: action_id.to_string(),
        });
    };
    let url = action_url(action_id, version);
    info!("🚚 downloading action {action_id}");
    let action_dir = paths::action_cache_dir(&url);
    if action_dir.exists() {
        std::fs::remove_dir_all(&action_dir)?;
    }
    download_and_extract_zip(&url, &action_dir).await?;

    // Bundles wrap the action source in a cloned-repo-* folder
    let mut root = action_dir.clone();
    for entry in std::fs::read_dir(&action_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with("cloned-repo-")
        {
            root = entry.path();
        }
    }
    schema::load(&root)
}

async fn download_and_extract_zip(url: &str, dest_dir: &Path) -> Result<()> {
    let response = reqwest::get(url).await?.error_for_status().map_err(|err| {
        CatalystError::RemoteActionDownload {
            url: url.to_string(),
            details: err.to_string(),
        }
    })?;
    let bytes = response.bytes().await?.to_vec();
    let dest = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip(&bytes, &dest))
        .await
        .map_err(|e| CatalystError::Io(std::io::Error::other(e.to_string())))?
}

/// Unzip into the destination, refusing entries that escape it
pub(crate) fn extract_zip(bytes: &[u8], dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(PathBuf::from) else {
            return Err(CatalystError::PathEscape {
                path: entry.name().to_string(),
            });
        };
        let dest = dest_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        std::fs::write(&dest, contents)?;
    }
    Ok(())
}

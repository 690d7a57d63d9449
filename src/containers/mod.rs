//! Container runtimes behind a uniform driver API
//!
//! Two production backends: the Docker daemon (HTTP API via bollard)
//! and the finch CLI. A provider registry is consulted in fixed order
//! — finch first, then docker — and the first whose availability
//! probe succeeds wins. `NOFINCH`/`NODOCKER` force-exclude a backend.
//! In dry-run mode no backend call happens, only debug logging.

pub mod docker;
pub mod finch;
pub mod mock;
pub mod types;

use std::fmt;
use std::sync::Arc;

use crate::runner::step::RunCtx;

pub use types::{
    registry_host, BuildImageInput, ContainerHandle, ContainerService, NewContainerInput,
    RegistryAuth,
};

/// The known backends, in probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Finch,
    Docker,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finch => f.write_str("finch"),
            Self::Docker => f.write_str("docker"),
        }
    }
}

const PROVIDERS: [ProviderKind; 2] = [ProviderKind::Finch, ProviderKind::Docker];

/// Probe a single backend
pub async fn available(ctx: &RunCtx, kind: ProviderKind) -> bool {
    match kind {
        ProviderKind::Finch => finch::available(ctx).await,
        ProviderKind::Docker => docker::available(ctx).await,
    }
}

/// First available backend in registry order, if any
pub async fn default_provider(ctx: &RunCtx) -> Option<ProviderKind> {
    for kind in PROVIDERS {
        if available(ctx, kind).await {
            return Some(kind);
        }
    }
    None
}

/// Construct the service for a backend
pub fn service(kind: ProviderKind) -> Arc<dyn ContainerService> {
    match kind {
        ProviderKind::Finch => Arc::new(finch::FinchService),
        ProviderKind::Docker => Arc::new(docker::DockerService),
    }
}

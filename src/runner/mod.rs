//! Plan execution engine: data model, executors, scheduler
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`plan`] | `Plan`, `EnvironmentConfiguration`, `FileMap`, `CommandGroup` |
//! | [`logsink`] | Line-oriented stdout/stderr sinks |
//! | [`step`] | Deferred step algebra + panic capture |
//! | [`tracker`] | Shared pending/failed plan state |
//! | [`mce`] | Cross-command cwd/env persistence convention |
//! | [`command_executor`] | Executor selection per command group |
//! | [`container_exec`] | Container command executor (MCE convention) |
//! | [`shell_exec`] | Host-shell command executor (MCE convention) |
//! | [`plan_runner`] | Runs one plan's command groups |
//! | [`scheduler`] | Parallel execution with deferral and re-queue |

pub mod command_executor;
pub mod container_exec;
pub mod logsink;
pub mod mce;
pub mod plan;
pub mod plan_runner;
pub mod scheduler;
pub mod shell_exec;
pub mod step;
pub mod tracker;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::containers;
use crate::error::CatalystError;
use crate::runner::step::RunCtx;

/// Forces shell or container execution of plans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    /// Run commands in a local shell
    Shell,
    /// Run commands in a Docker container
    Docker,
    /// Run commands in a Finch container
    Finch,
}

impl ExecutionType {
    /// Pick the execution type for this host: the first available
    /// container provider, shell otherwise.
    pub async fn default_for_host(ctx: &RunCtx) -> Self {
        match containers::default_provider(ctx).await {
            Some(containers::ProviderKind::Finch) => Self::Finch,
            Some(containers::ProviderKind::Docker) => Self::Docker,
            None => Self::Shell,
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Shell => "shell",
            Self::Docker => "docker",
            Self::Finch => "finch",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionType {
    type Err = CatalystError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Self::Shell),
            "docker" => Ok(Self::Docker),
            "finch" => Ok(Self::Finch),
            other => Err(CatalystError::ProviderUnavailable {
                executor: other.to_string(),
            }),
        }
    }
}

/// Resolve a possibly-relative path against a base directory
pub(crate) fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

//! Executor selection: one command group → one command executor
//!
//! Both variants share the contract: `execute_command` runs a single
//! command in the staged environment, `close` performs copy-out and
//! cleanup. Working directory and exported shell variables persist
//! between successive commands on the same executor.

use async_trait::async_trait;

use crate::containers;
use crate::error::{CatalystError, Result};
use crate::runner::container_exec::ContainerCommandExecutor;
use crate::runner::plan::{Command, CommandGroup, EnvironmentConfiguration};
use crate::runner::shell_exec::ShellCommandExecutor;
use crate::runner::step::RunCtx;
use crate::runner::ExecutionType;

#[async_trait]
pub trait CommandExecutor: Send {
    async fn execute_command(&mut self, ctx: &RunCtx, command: &Command) -> Result<()>;
    async fn close(&mut self, ctx: &RunCtx, is_error: bool) -> Result<()>;
}

/// Build the executor for one command group.
///
/// Shell execution ignores the group image; container execution picks
/// the requested backend (or the first available one) and fails fast
/// when its availability probe does not succeed.
pub async fn new_command_executor(
    ctx: &RunCtx,
    id: &str,
    execution_type: ExecutionType,
    group: &CommandGroup,
    environment: &EnvironmentConfiguration,
) -> Result<Box<dyn CommandExecutor>> {
    let kind = match execution_type {
        ExecutionType::Shell => {
            let exec = ShellCommandExecutor::new(ctx, environment).await?;
            return Ok(Box::new(exec));
        }
        ExecutionType::Docker => containers::ProviderKind::Docker,
        ExecutionType::Finch => containers::ProviderKind::Finch,
    };
    if !containers::available(ctx, kind).await {
        return Err(CatalystError::ProviderUnavailable {
            executor: kind.to_string(),
        });
    }
    let service = containers::service(kind);
    let exec = ContainerCommandExecutor::new(ctx, id, group, environment, service).await?;
    Ok(Box::new(exec))
}

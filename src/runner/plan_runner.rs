//! Plan runner: executes a single plan's command groups in order
//!
//! Each group gets a fresh command executor. Commands run sequentially;
//! the first failure closes the executor on the error path and fails
//! the plan. Panics are captured at this boundary so one plan's crash
//! cannot take down the scheduler.

use tracing::{debug, info};

use crate::error::{CatalystError, Result};
use crate::runner::command_executor::new_command_executor;
use crate::runner::plan::Plan;
use crate::runner::step::{catch_panic, RunCtx};
use crate::runner::ExecutionType;

/// Execute every command group of the plan
pub async fn run_plan(
    ctx: &RunCtx,
    namespace: &str,
    execution_type: ExecutionType,
    plan: &mut Plan,
) -> Result<()> {
    debug!(plan = ?plan, "about to execute plan");
    let groups = plan.command_groups.clone();
    for group in &groups {
        let id = format!("{namespace}-{}", plan.id);
        let result = catch_panic(async {
            let mut executor =
                new_command_executor(ctx, &id, execution_type, group, &plan.environment).await?;
            for command in &group.commands {
                info!(id = %plan.id, "⚡️ {}", command.join(" "));
                if let Err(err) = executor.execute_command(ctx, command).await {
                    return match executor.close(ctx, true).await {
                        Ok(()) => Err(err),
                        Err(close_err) => Err(CatalystError::Aggregate(vec![err, close_err])),
                    };
                }
            }
            executor.close(ctx, false).await
        })
        .await;
        result?;
    }
    Ok(())
}

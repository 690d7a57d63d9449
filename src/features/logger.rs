//! ConsoleLogger: routes a plan's command output through the tracing
//! logger, tagged with the plan id

use async_trait::async_trait;

use super::{Feature, Gate};
use crate::error::Result;
use crate::runner::logsink::TracingSink;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Feature for ConsoleLogger {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        let sink = TracingSink::for_plan(&plan.id);
        plan.environment.stdout = sink.clone();
        plan.environment.stderr = sink;
        Ok(Gate::Run)
    }
}

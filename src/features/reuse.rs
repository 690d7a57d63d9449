//! Reuse: configures whether a plan executes with reused containers

use async_trait::async_trait;
use tracing::debug;

use super::{Feature, Gate};
use crate::error::Result;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct Reuse {
    reuse: bool,
}

impl Reuse {
    pub fn new(reuse: bool) -> Self {
        Self { reuse }
    }
}

#[async_trait]
impl Feature for Reuse {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER Reuse {}", self.reuse);
        plan.environment.reuse = self.reuse;
        Ok(Gate::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_reuse_on_the_environment() {
        let mut plan = Plan::new("p", "/tmp");
        Reuse::new(true)
            .before(&RunCtx::new(), &mut plan)
            .await
            .unwrap();
        assert!(plan.environment.reuse);
    }
}

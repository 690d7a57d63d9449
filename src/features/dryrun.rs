//! Dryrun: skips execution entirely when enabled

use async_trait::async_trait;
use tracing::debug;

use super::{Feature, Gate};
use crate::error::Result;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct Dryrun {
    dryrun: bool,
}

impl Dryrun {
    pub fn new(dryrun: bool) -> Self {
        Self { dryrun }
    }
}

#[async_trait]
impl Feature for Dryrun {
    async fn before(&self, ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
        if self.dryrun || ctx.dry_run {
            debug!("EXIT Dryrun early");
            return Ok(Gate::Skip);
        }
        Ok(Gate::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_when_enabled() {
        let mut plan = Plan::new("p", "/tmp");
        let gate = Dryrun::new(true)
            .before(&RunCtx::new(), &mut plan)
            .await
            .unwrap();
        assert_eq!(gate, Gate::Skip);
    }

    #[tokio::test]
    async fn runs_when_disabled() {
        let mut plan = Plan::new("p", "/tmp");
        let gate = Dryrun::new(false)
            .before(&RunCtx::new(), &mut plan)
            .await
            .unwrap();
        assert_eq!(gate, Gate::Run);
    }

    #[tokio::test]
    async fn context_flag_also_skips() {
        let mut plan = Plan::new("p", "/tmp");
        let ctx = RunCtx::new().dry_run(true);
        let gate = Dryrun::new(false).before(&ctx, &mut plan).await.unwrap();
        assert_eq!(gate, Gate::Skip);
    }
}

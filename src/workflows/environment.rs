//! EnvironmentExport: associates a workflow environment with a local
//! credential profile
//!
//! Credential resolution itself is out of scope; the plan only gets
//! `AWS_PROFILE` exported so tools in the action pick up the mapped
//! profile.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::features::{Feature, Gate};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct EnvironmentExport {
    profile: String,
}

impl EnvironmentExport {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl Feature for EnvironmentExport {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER EnvironmentExport profile={}", self.profile);
        plan.environment
            .env
            .insert("AWS_PROFILE".to_string(), self.profile.clone());
        Ok(Gate::Run)
    }
}

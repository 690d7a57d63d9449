//! StatusLogger: user-visible plan lifecycle lines
//!
//! Logs "✨ STARTING" on the way in and "✅ SUCCESS" / "❌ FAILED" on
//! the way out. Warnings are logged and converted to success for the
//! plan; the deferred sentinel passes through untouched.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Feature, Gate};
use crate::error::Result;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct StatusLogger {
    id: String,
}

impl StatusLogger {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Feature for StatusLogger {
    async fn before(&self, _ctx: &RunCtx, _plan: &mut Plan) -> Result<Gate> {
        info!(id = %self.id, "✨ STARTING");
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                info!(id = %self.id, "✅ SUCCESS");
                Ok(())
            }
            Err(err) if err.is_deferred() => Err(err),
            Err(err) if err.is_warning() => {
                warn!(id = %self.id, "   {err}");
                Ok(())
            }
            Err(err) => {
                error!(id = %self.id, "❌ FAILED: {err}");
                Err(err)
            }
        }
    }
}

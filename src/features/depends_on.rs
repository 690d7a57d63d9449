//! DependsOn: the dependency gate
//!
//! Before the inner step runs, every id in the plan's `depends_on`
//! set is checked against the tracker. A failed dependency cancels
//! the plan with a warning; an unsettled one defers it. After the
//! inner step, the plan is marked succeeded or failed.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{Feature, Gate};
use crate::error::{CatalystError, Result};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;
use crate::runner::tracker::ProgressHandle;

pub struct DependsOn {
    handle: ProgressHandle,
    /// Dependencies already announced as "WAITING", to log each once
    logged: Mutex<Vec<String>>,
}

impl DependsOn {
    pub fn new(handle: ProgressHandle) -> Self {
        Self {
            handle,
            logged: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Feature for DependsOn {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER DependsOn");
        for dependency in &plan.depends_on {
            match self.handle.is_ready(std::slice::from_ref(dependency)) {
                Err(err) => {
                    error!("❌ aborted while waiting for {dependency}");
                    self.handle.failure();
                    return Err(err);
                }
                Ok(false) => {
                    let mut logged = self.logged.lock().unwrap();
                    if !logged.contains(dependency) {
                        info!(id = %self.handle.plan_id(), "⏳ WAITING for {dependency} to succeed");
                        logged.push(dependency.clone());
                    }
                    return Err(CatalystError::Deferred);
                }
                Ok(true) => {}
            }
        }
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.handle.success(),
            Err(err) if err.is_deferred() => {}
            Err(_) => self.handle.failure(),
        }
        debug!("EXIT DependsOn");
        result
    }
}

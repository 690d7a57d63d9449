//! ActionInputHandler: turns configured parameters into `INPUT_*`
//! environment variables, enforcing required parameters

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::actions::schema::ActionSpec;
use crate::error::{CatalystError, Result};
use crate::features::{Feature, Gate};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct ActionInputHandler {
    action: Arc<ActionSpec>,
    inputs: BTreeMap<String, String>,
}

impl ActionInputHandler {
    pub fn new(action: Arc<ActionSpec>, inputs: BTreeMap<String, String>) -> Self {
        Self { action, inputs }
    }
}

#[async_trait]
impl Feature for ActionInputHandler {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER ActionInputHandler");
        for (name, param) in &self.action.configuration {
            let value = match self.inputs.get(name) {
                Some(value) => value.clone(),
                None if param.required && param.default.is_empty() => {
                    return Err(CatalystError::RequiredInput {
                        name: name.clone(),
                        action: self.action.id.clone(),
                    });
                }
                None => param.default.clone(),
            };
            plan.environment
                .env
                .insert(format!("INPUT_{}", name.to_uppercase()), value);
        }
        Ok(Gate::Run)
    }
}

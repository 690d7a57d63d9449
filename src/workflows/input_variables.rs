//! InputVariableHandler: declared workflow input variables become
//! plain environment variables

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::features::{Feature, Gate};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

pub struct InputVariableHandler {
    inputs: BTreeMap<String, String>,
}

impl InputVariableHandler {
    pub fn new(inputs: BTreeMap<String, String>) -> Self {
        Self { inputs }
    }
}

#[async_trait]
impl Feature for InputVariableHandler {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER InputVariableHandler");
        for (name, value) in &self.inputs {
            plan.environment.env.insert(name.clone(), value.clone());
        }
        Ok(Gate::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inputs_land_in_env() {
        let mut inputs = BTreeMap::new();
        inputs.insert("MyEnv".to_string(), "hello ${P1.Foo}!".to_string());
        let feature = InputVariableHandler::new(inputs);
        let mut plan = Plan::new("p", "/tmp");
        feature.before(&RunCtx::new(), &mut plan).await.unwrap();
        assert_eq!(
            plan.environment.env.get("MyEnv"),
            Some(&"hello ${P1.Foo}!".to_string())
        );
    }
}

//! ReplaceVariableHandler: `${plan.Var}` and `${Secrets.name}` token
//! substitution
//!
//! Every env value and every command component is scanned. Secrets
//! resolve through the provider and are re-emitted as
//! `${CATALYST_SECRETS_<name>}` for the shell to expand, keeping the
//! plaintext out of the command line. A token naming a plan that is
//! not yet a dependency adds the dependency and defers the plan.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::outputs::PlanOutputs;
use crate::error::{CatalystError, Result};
use crate::features::{Feature, Gate};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

/// Resolves `${Secrets.<name>}` references
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

/// Default provider: secrets are environment variables of the runner
/// process
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| CatalystError::SecretUndefined {
            name: name.to_string(),
        })
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9.\-_]+)\.([a-zA-Z0-9\-_]+)\}").expect("valid regex"))
}

pub struct ReplaceVariableHandler {
    outputs: PlanOutputs,
    secrets: Arc<dyn SecretProvider>,
}

impl ReplaceVariableHandler {
    pub fn new(outputs: PlanOutputs, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { outputs, secrets }
    }

    /// Substitute all tokens in one value. New secret env entries are
    /// collected into `secret_env`; a token requiring an un-recorded
    /// dependency records it and defers.
    async fn replace(
        &self,
        value: &str,
        depends_on: &mut Vec<String>,
        secret_env: &mut BTreeMap<String, String>,
    ) -> Result<String> {
        let mut result = String::with_capacity(value.len());
        let mut last = 0;
        for captures in token_pattern().captures_iter(value) {
            let whole = captures.get(0).expect("group 0");
            let prefix = &captures[1];
            let name = &captures[2];
            result.push_str(&value[last..whole.start()]);
            last = whole.end();

            if prefix == "Secrets" {
                let env_name = format!("CATALYST_SECRETS_{name}");
                let secret = self.secrets.get_secret(name).await?;
                secret_env.insert(env_name.clone(), secret);
                debug!("replacing SECRET {name} with {env_name}");
                result.push_str(&format!("${{{env_name}}}"));
            } else {
                let plan_id = prefix.replacen('.', "@", 1);
                if !depends_on.contains(&plan_id) {
                    debug!("adding DependsOn {plan_id}");
                    depends_on.push(plan_id);
                    return Err(CatalystError::Deferred);
                }
                let replacement = self.outputs.get(&plan_id, name).unwrap_or_default();
                debug!("replacing VAR {} with {replacement}", whole.as_str());
                result.push_str(&replacement);
            }
        }
        result.push_str(&value[last..]);
        Ok(result)
    }
}

#[async_trait]
impl Feature for ReplaceVariableHandler {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        debug!("ENTER ReplaceVariableHandler");
        // Resolved secrets are kept even when a later token defers, so
        // re-entry does not fetch them twice.
        let mut secret_env = BTreeMap::new();
        let mut outcome = Ok(Gate::Run);

        'scan: {
            let keys: Vec<String> = plan.environment.env.keys().cloned().collect();
            for key in keys {
                let value = plan.environment.env[&key].clone();
                match self
                    .replace(&value, &mut plan.depends_on, &mut secret_env)
                    .await
                {
                    Ok(replaced) => {
                        plan.environment.env.insert(key, replaced);
                    }
                    Err(err) => {
                        outcome = Err(err);
                        break 'scan;
                    }
                }
            }
            for group in &mut plan.command_groups {
                for command in &mut group.commands {
                    for part in command.iter_mut() {
                        match self
                            .replace(part, &mut plan.depends_on, &mut secret_env)
                            .await
                        {
                            Ok(replaced) => *part = replaced,
                            Err(err) => {
                                outcome = Err(err);
                                break 'scan;
                            }
                        }
                    }
                }
            }
        }
        plan.environment.env.append(&mut secret_env);
        outcome
    }
}

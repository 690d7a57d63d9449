//! Per-plan output variables shared across features
//!
//! The output-capture handler writes a plan's variables while the plan
//! executes; the variable substitution handler reads them from other
//! plans. Readers only consult plans the dependency gate has already
//! marked succeeded, so they observe a stable snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::actions::CapturedOutputs;

/// plan id → (variable name → value)
#[derive(Clone, Default)]
pub struct PlanOutputs {
    inner: Arc<DashMap<String, CapturedOutputs>>,
}

impl PlanOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutable per-plan slot, created on first use
    pub fn slot(&self, plan_id: &str) -> CapturedOutputs {
        self.inner
            .entry(plan_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())))
            .clone()
    }

    /// A variable captured by another plan; empty-name lookups and
    /// unknown plans resolve to `None`
    pub fn get(&self, plan_id: &str, name: &str) -> Option<String> {
        self.inner
            .get(plan_id)
            .and_then(|slot| slot.lock().unwrap().get(name).cloned())
    }

    pub fn set(&self, plan_id: &str, name: &str, value: &str) {
        self.slot(plan_id)
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

/// artifact name → producing plan id; populated synchronously at
/// feature construction time, before parallel execution starts
pub type ArtifactRegistry = Arc<DashMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_shared_between_handles() {
        let outputs = PlanOutputs::new();
        let slot = outputs.slot("build");
        slot.lock().unwrap().insert("Version".into(), "1.2.3".into());
        assert_eq!(outputs.get("build", "Version"), Some("1.2.3".to_string()));
        assert_eq!(outputs.get("build", "Other"), None);
        assert_eq!(outputs.get("unknown", "Version"), None);
    }
}

//! Plan tracker: shared pending/failed state across plan executions
//!
//! The dependency gate asks the tracker whether a plan's dependencies
//! are settled. Names of grouped actions take the form `group@action`,
//! so matching considers the bare id, the dependant's own group, and
//! the `id@*` prefix for a dependency that is itself a group.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{CatalystError, Result};

#[derive(Default)]
struct TrackerState {
    pending: Vec<String>,
    failed: Vec<String>,
}

/// Shared progress state for all plans in a run
#[derive(Default)]
pub struct PlanTracker {
    state: Mutex<TrackerState>,
}

impl PlanTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a plan as pending and return its progress handle.
    /// Handles are created synchronously before parallel execution
    /// starts, so every plan is visible as pending from the first
    /// readiness query.
    pub fn progress_handle(self: &Arc<Self>, plan_id: impl Into<String>) -> ProgressHandle {
        let plan_id = plan_id.into();
        self.state.lock().unwrap().pending.push(plan_id.clone());
        ProgressHandle {
            tracker: Arc::clone(self),
            plan_id,
        }
    }
}

/// Per-plan handle used by the dependency gate
pub struct ProgressHandle {
    tracker: Arc<PlanTracker>,
    plan_id: String,
}

impl ProgressHandle {
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    /// Mark the plan as succeeded
    pub fn success(&self) {
        let mut state = self.tracker.state.lock().unwrap();
        state.pending.retain(|p| p != &self.plan_id);
    }

    /// Mark the plan as failed
    pub fn failure(&self) {
        let mut state = self.tracker.state.lock().unwrap();
        state.failed.push(self.plan_id.clone());
        state.pending.retain(|p| p != &self.plan_id);
    }

    /// Whether every named dependency has succeeded.
    ///
    /// Returns `Ok(false)` while a matching entry is still pending and
    /// a cancellation warning once a matching entry has failed.
    pub fn is_ready(&self, depends_on: &[String]) -> Result<bool> {
        let group = self.plan_id.split_once('@').map(|(g, _)| g);
        let state = self.tracker.state.lock().unwrap();
        for dependency in depends_on {
            if state.failed.iter().any(|f| matches_dep(f, dependency, group)) {
                return Err(CatalystError::warning(format!(
                    "cancelled {}: dependency {} failed",
                    self.plan_id, dependency
                )));
            }
            if let Some(p) = state
                .pending
                .iter()
                .find(|p| matches_dep(p, dependency, group))
            {
                debug!("DEFER [{}] for dependency [{}]", self.plan_id, p);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn matches_dep(entry: &str, dependency: &str, group: Option<&str>) -> bool {
    if entry == dependency || entry.starts_with(&format!("{dependency}@")) {
        return true;
    }
    match group {
        Some(g) => entry == format!("{g}@{dependency}"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_when_no_dependencies() {
        let tracker = PlanTracker::new();
        let handle = tracker.progress_handle("solo");
        assert!(handle.is_ready(&[]).unwrap());
    }

    #[test]
    fn pending_dependency_defers() {
        let tracker = PlanTracker::new();
        let _dep = tracker.progress_handle("build");
        let handle = tracker.progress_handle("deploy");
        assert!(!handle.is_ready(&["build".to_string()]).unwrap());
    }

    #[test]
    fn succeeded_dependency_is_ready() {
        let tracker = PlanTracker::new();
        let dep = tracker.progress_handle("build");
        let handle = tracker.progress_handle("deploy");
        dep.success();
        assert!(handle.is_ready(&["build".to_string()]).unwrap());
    }

    #[test]
    fn failed_dependency_cancels_with_warning() {
        let tracker = PlanTracker::new();
        let dep = tracker.progress_handle("build");
        let handle = tracker.progress_handle("deploy");
        dep.failure();
        let err = handle.is_ready(&["build".to_string()]).unwrap_err();
        assert!(err.is_warning());
        assert_eq!(err.to_string(), "cancelled deploy: dependency build failed");
    }

    #[test]
    fn group_qualified_names_match() {
        let tracker = PlanTracker::new();
        let _dep = tracker.progress_handle("grp@build");
        // Sibling inside the same group depends on the bare action name
        let handle = tracker.progress_handle("grp@deploy");
        assert!(!handle.is_ready(&["build".to_string()]).unwrap());
    }

    #[test]
    fn group_prefix_matches_whole_group_dependency() {
        let tracker = PlanTracker::new();
        let member = tracker.progress_handle("grp@build");
        let handle = tracker.progress_handle("deploy");
        // Depending on "grp" waits for every "grp@*" member
        assert!(!handle.is_ready(&["grp".to_string()]).unwrap());
        member.success();
        assert!(handle.is_ready(&["grp".to_string()]).unwrap());
    }

    #[test]
    fn failure_of_group_member_cancels_group_dependants() {
        let tracker = PlanTracker::new();
        let member = tracker.progress_handle("grp@build");
        let handle = tracker.progress_handle("deploy");
        member.failure();
        let err = handle.is_ready(&["grp".to_string()]).unwrap_err();
        assert!(err.is_warning());
    }
}

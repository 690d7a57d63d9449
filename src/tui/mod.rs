//! Terminal UI: one row per plan, a detail pane for the selected
//! plan's log, spinner icons while plans run
//!
//! The UI runs on a dedicated thread owning the terminal. Features
//! report status transitions through a [`TuiHandle`]; plan output is
//! routed into per-row log buffers via the environment sinks. Ctrl-C
//! cancels the root context, the same path the process signal handler
//! takes.

mod app;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::features::{Feature, Gate};
use crate::runner::logsink::{LineSink, LogSink};
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Pending,
    Running,
    Deferred,
    Succeeded,
    Failed,
}

impl PlanStatus {
    pub(crate) fn icon(&self, spinner_frame: usize) -> String {
        const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        match self {
            Self::Pending | Self::Deferred => "⏸".to_string(),
            Self::Running => FRAMES[spinner_frame % FRAMES.len()].to_string(),
            Self::Succeeded => "✅".to_string(),
            Self::Failed => "❌".to_string(),
        }
    }
}

pub(crate) struct PlanRow {
    pub id: String,
    pub status: PlanStatus,
    pub log: Vec<String>,
}

pub(crate) struct TuiState {
    pub rows: Mutex<Vec<PlanRow>>,
    pub selected: AtomicUsize,
    /// Set once the user navigated; disables auto-selection
    pub user_selected: AtomicBool,
    pub cancel: CancellationToken,
    pub stop: AtomicBool,
    started: AtomicBool,
}

/// Shared handle between the features and the UI thread
#[derive(Clone)]
pub struct TuiHandle {
    state: Arc<TuiState>,
}

impl TuiHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(TuiState {
                rows: Mutex::new(Vec::new()),
                selected: AtomicUsize::new(0),
                user_selected: AtomicBool::new(false),
                cancel,
                stop: AtomicBool::new(false),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Launch the UI thread on first use
    fn ensure_started(&self) {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || {
            if let Err(err) = app::run_ui(state) {
                tracing::error!("TUI failed: {err}");
            }
        });
    }

    fn row_index(&self, plan_id: &str) -> usize {
        let mut rows = self.state.rows.lock().unwrap();
        if let Some(index) = rows.iter().position(|r| r.id == plan_id) {
            return index;
        }
        rows.push(PlanRow {
            id: plan_id.to_string(),
            status: PlanStatus::Pending,
            log: Vec::new(),
        });
        rows.len() - 1
    }

    fn set_status(&self, plan_id: &str, status: PlanStatus) {
        let index = self.row_index(plan_id);
        let mut rows = self.state.rows.lock().unwrap();
        rows[index].status = status;
        drop(rows);
        // Auto-select the first plan that starts running
        if status == PlanStatus::Running && !self.state.user_selected.load(Ordering::SeqCst) {
            self.state.selected.store(index, Ordering::SeqCst);
        }
    }

    fn append_log(&self, plan_id: &str, line: &str) {
        let index = self.row_index(plan_id);
        let mut rows = self.state.rows.lock().unwrap();
        rows[index]
            .log
            .push(line.trim_end_matches(['\r', '\n']).to_string());
    }

    /// Stop the UI thread and give the terminal back
    pub fn shutdown(&self) {
        self.state.stop.store(true, Ordering::SeqCst);
    }
}

struct TuiSink {
    handle: TuiHandle,
    plan_id: String,
}

impl LineSink for TuiSink {
    fn line(&self, line: &str) {
        self.handle.append_log(&self.plan_id, line);
    }
}

/// Feature wiring a plan into the UI
pub struct TuiLogger {
    handle: TuiHandle,
    plan_id: String,
}

impl TuiLogger {
    pub fn new(handle: TuiHandle, plan_id: impl Into<String>) -> Self {
        Self {
            handle,
            plan_id: plan_id.into(),
        }
    }
}

#[async_trait]
impl Feature for TuiLogger {
    async fn before(&self, _ctx: &RunCtx, plan: &mut Plan) -> Result<Gate> {
        self.handle.ensure_started();
        self.handle.set_status(&self.plan_id, PlanStatus::Running);
        let sink: LogSink = Arc::new(TuiSink {
            handle: self.handle.clone(),
            plan_id: self.plan_id.clone(),
        });
        plan.environment.stdout = sink.clone();
        plan.environment.stderr = sink;
        Ok(Gate::Run)
    }

    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        let status = match &result {
            Ok(()) => PlanStatus::Succeeded,
            Err(err) if err.is_deferred() => PlanStatus::Deferred,
            Err(err) => {
                self.handle.append_log(&self.plan_id, &err.to_string());
                PlanStatus::Failed
            }
        };
        self.handle.set_status(&self.plan_id, status);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalystError;

    #[tokio::test]
    async fn logger_tracks_status_transitions() {
        // Swapped-in state without starting the UI thread
        let handle = TuiHandle::new(CancellationToken::new());
        handle.state.started.store(true, Ordering::SeqCst);

        let logger = TuiLogger::new(handle.clone(), "build");
        let mut plan = Plan::new("build", "/tmp");
        logger.before(&RunCtx::new(), &mut plan).await.unwrap();
        plan.environment.stdout.line("compiling...\n");

        {
            let rows = handle.state.rows.lock().unwrap();
            assert_eq!(rows[0].status, PlanStatus::Running);
            assert_eq!(rows[0].log, vec!["compiling..."]);
        }

        logger
            .after(&RunCtx::new(), &mut plan, Ok(()))
            .await
            .unwrap();
        assert_eq!(
            handle.state.rows.lock().unwrap()[0].status,
            PlanStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn deferred_rows_go_back_to_paused() {
        let handle = TuiHandle::new(CancellationToken::new());
        handle.state.started.store(true, Ordering::SeqCst);

        let logger = TuiLogger::new(handle.clone(), "deploy");
        let mut plan = Plan::new("deploy", "/tmp");
        logger.before(&RunCtx::new(), &mut plan).await.unwrap();
        let result = logger
            .after(&RunCtx::new(), &mut plan, Err(CatalystError::Deferred))
            .await;
        assert!(result.unwrap_err().is_deferred());
        assert_eq!(
            handle.state.rows.lock().unwrap()[0].status,
            PlanStatus::Deferred
        );
    }

    #[test]
    fn icons_match_status() {
        assert_eq!(PlanStatus::Succeeded.icon(0), "✅");
        assert_eq!(PlanStatus::Failed.icon(3), "❌");
        assert_ne!(PlanStatus::Running.icon(0), PlanStatus::Running.icon(1));
    }
}

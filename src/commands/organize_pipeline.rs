use serde::Serialize;

use crate::error::AppError;
use crate::models::layout::DesiredState;
use crate::models::operation::{ExecutionReport, MovePlan, PipelineReport, SolverStrategy};
use crate::services::classifier_service::{self, TabClassifier};
use crate::services::executor_service;
use crate::services::host::{BrowserHost, MoveTarget};
use crate::services::planner_service;
use crate::services::snapshot_service::{self, Snapshot};
use crate::services::solver_service;
use crate::state::{AppState, OrganizePhase, OrganizeProgressState, ProgressEvent, ProgressSink};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const SNAPSHOT_WEIGHT: f64 = 0.05;
const SOLVING_WEIGHT: f64 = 0.20;
const PLANNING_WEIGHT: f64 = 0.05;
const EXECUTING_WEIGHT: f64 = 0.55;
const CONVERGING_WEIGHT: f64 = 0.10;
const CLEANUP_WEIGHT: f64 = 0.05;

// ---------------------------------------------------------------------------
// Pipeline context
// ---------------------------------------------------------------------------

pub struct PipelineCtx<'a> {
    pub host: &'a dyn BrowserHost,
    pub classifier: Option<&'a dyn TabClassifier>,
    pub state: &'a AppState,
    pub progress: &'a dyn ProgressSink,
    pub run_id: String,
}

impl<'a> PipelineCtx<'a> {
    pub fn new(
        host: &'a dyn BrowserHost,
        state: &'a AppState,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            host,
            classifier: None,
            state,
            progress,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_classifier(mut self, classifier: &'a dyn TabClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn recorder(&self) -> RecordingProgress<'_> {
        RecordingProgress { ctx: self }
    }

    fn emit(
        &self,
        phase: OrganizePhase,
        current: usize,
        total: usize,
        detail: impl Into<String>,
    ) {
        self.recorder()
            .on_progress(ProgressEvent::new(phase, current, total, detail));
    }

    /// Fresh snapshot, also published to the shared cache.
    async fn capture(&self) -> Result<Snapshot, AppError> {
        let snapshot = snapshot_service::capture(self.host).await?;
        self.state.browser_cache.store(snapshot.clone());
        Ok(snapshot)
    }
}

/// Records every event on the app state, then forwards it to the caller's
/// sink. Events after a terminal phase are dropped.
struct RecordingProgress<'a> {
    ctx: &'a PipelineCtx<'a>,
}

impl ProgressSink for RecordingProgress<'_> {
    fn on_progress(&self, event: ProgressEvent) {
        if record_organize_progress(self.ctx.state, &self.ctx.run_id, &event).is_some() {
            self.ctx.progress.on_progress(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Progress helpers
// ---------------------------------------------------------------------------

fn phase_percent(current: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0) as usize
}

fn combined_percent_for_phase(phase: OrganizePhase, percent: usize) -> usize {
    let (start, weight) = match phase {
        OrganizePhase::Snapshot => (0.0, SNAPSHOT_WEIGHT),
        OrganizePhase::Solving | OrganizePhase::Classifying => (5.0, SOLVING_WEIGHT),
        OrganizePhase::Planning => (25.0, PLANNING_WEIGHT),
        OrganizePhase::Executing => (30.0, EXECUTING_WEIGHT),
        OrganizePhase::Converging => (85.0, CONVERGING_WEIGHT),
        OrganizePhase::Cleanup => (95.0, CLEANUP_WEIGHT),
        OrganizePhase::Done => return 100,
        OrganizePhase::Error => return percent.min(100),
    };
    ((start + percent as f64 * weight).round() as usize).min(100)
}

pub fn record_organize_progress(
    state: &AppState,
    run_id: &str,
    event: &ProgressEvent,
) -> Option<OrganizeProgressState> {
    let percent = phase_percent(event.current, event.total);
    let previous = state
        .get_organize_status()
        .filter(|progress| progress.run_id == run_id);
    if previous
        .as_ref()
        .is_some_and(|progress| progress.phase.is_terminal())
    {
        return None;
    }

    let combined_percent = match event.phase {
        OrganizePhase::Error => previous.as_ref().map_or(0, |p| p.combined_percent),
        phase => combined_percent_for_phase(phase, percent),
    };
    let combined_percent = previous.as_ref().map_or(combined_percent, |progress| {
        progress.combined_percent.max(combined_percent)
    });

    let payload = OrganizeProgressState {
        run_id: run_id.to_string(),
        phase: event.phase,
        current: event.current,
        total: event.total,
        percent,
        combined_percent,
        detail: event.detail.clone(),
        sequence: state.next_organize_progress_sequence(),
    };

    state.set_organize_status(payload.clone());
    Some(payload)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

async fn stage_solve(
    ctx: &PipelineCtx<'_>,
    snapshot: &Snapshot,
    use_classifier: bool,
) -> (DesiredState, SolverStrategy) {
    let config = &ctx.state.config;
    if !use_classifier {
        ctx.emit(OrganizePhase::Solving, 0, 1, "Grouping tabs by domain");
        return (
            solver_service::solve_deterministic(snapshot, config),
            SolverStrategy::Deterministic,
        );
    }

    match ctx.classifier {
        Some(classifier) => {
            let recorder = ctx.recorder();
            if let Some(desired) =
                classifier_service::solve_with_classifier(snapshot, classifier, config, &recorder)
                    .await
            {
                return (desired, SolverStrategy::Classifier);
            }
            tracing::warn!(run_id = %ctx.run_id, "classifier unusable, grouping by domain");
        }
        None => {
            tracing::warn!(run_id = %ctx.run_id, "no classifier configured, grouping by domain")
        }
    }

    ctx.emit(OrganizePhase::Solving, 0, 1, "Grouping tabs by domain");
    (
        solver_service::solve_deterministic(snapshot, config),
        SolverStrategy::ClassifierFallback,
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StragglerOutcome {
    pub tabs_moved: usize,
    pub windows_merged: usize,
    pub errors: usize,
}

/// Folds small windows holding only unclaimed tabs into the largest window.
/// Windows with any claimed tab are left alone whatever their size.
pub async fn stage_cleanup_stragglers(
    ctx: &PipelineCtx<'_>,
    desired: &DesiredState,
) -> Result<StragglerOutcome, AppError> {
    let config = &ctx.state.config;
    let snapshot = ctx.capture().await?;
    let mut outcome = StragglerOutcome::default();

    let mut largest: Option<(i64, usize)> = None;
    for window in &snapshot.windows {
        let count = snapshot.tabs_in_window(window.id).len();
        if largest.map_or(true, |(_, top)| count > top) {
            largest = Some((window.id, count));
        }
    }
    let Some((largest, _)) = largest else {
        return Ok(outcome);
    };

    let claimed = desired.claimed_tab_ids();
    let candidates = snapshot
        .windows
        .iter()
        .map(|window| window.id)
        .filter(|id| *id != largest)
        .filter_map(|id| {
            let tabs = snapshot.tabs_in_window(id);
            let eligible = !tabs.is_empty()
                && tabs.len() < config.straggler_threshold
                && tabs.iter().all(|tab_id| !claimed.contains(tab_id))
                && !(config.exclude_pinned
                    && tabs
                        .iter()
                        .any(|tab_id| snapshot.tab(*tab_id).is_some_and(|tab| tab.pinned)));
            eligible.then(|| (id, tabs.to_vec()))
        })
        .collect::<Vec<_>>();

    let total = candidates.len();
    for (index, (window_id, tabs)) in candidates.into_iter().enumerate() {
        ctx.emit(
            OrganizePhase::Cleanup,
            index,
            total,
            format!("Merging window {window_id}"),
        );
        let host = ctx.host;
        let result = config
            .move_retry_policy()
            .run(
                |_| host.move_tabs(&tabs, MoveTarget::append_to(largest)),
                AppError::is_retryable,
            )
            .await;
        match result {
            Ok(()) => {
                tracing::debug!(window_id, into = largest, tabs = tabs.len(), "straggler merged");
                outcome.tabs_moved += tabs.len();
                outcome.windows_merged += 1;
            }
            Err(err) if err.is_vanished() => {
                tracing::debug!(window_id, error = %err, "straggler vanished");
            }
            Err(err) => {
                tracing::warn!(window_id, error = %err, "straggler merge failed");
                outcome.errors += 1;
            }
        }
    }
    ctx.emit(OrganizePhase::Cleanup, total, total, "Cleanup complete");
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

async fn run_organize(
    ctx: &PipelineCtx<'_>,
    use_classifier: bool,
) -> Result<PipelineReport, AppError> {
    let config = &ctx.state.config;

    ctx.emit(OrganizePhase::Snapshot, 0, 1, "Reading browser state");
    let snapshot = ctx.capture().await?;
    ctx.emit(
        OrganizePhase::Snapshot,
        1,
        1,
        format!("{} tabs in {} windows", snapshot.tabs.len(), snapshot.windows.len()),
    );

    let (desired, strategy) = stage_solve(ctx, &snapshot, use_classifier).await;
    let mut report = PipelineReport::new(ctx.run_id.clone(), strategy);

    ctx.emit(OrganizePhase::Planning, 0, 1, "Planning moves");
    let plan = planner_service::plan(&snapshot, &desired);
    ctx.emit(
        OrganizePhase::Planning,
        1,
        1,
        format!("{} operations", plan.operations.len()),
    );

    if plan.stats.is_noop() {
        tracing::info!(run_id = %ctx.run_id, "already organized");
        report.already_organized = true;
        report.completed_at = chrono::Utc::now().to_rfc3339();
        return Ok(report);
    }

    let recorder = ctx.recorder();
    let first = executor_service::execute_plan(ctx.host, &plan, config, &recorder).await;
    report.absorb(&first);
    report.passes = 1;

    for pass in 1..=config.max_convergence_passes {
        ctx.emit(
            OrganizePhase::Converging,
            pass - 1,
            config.max_convergence_passes,
            format!("Verification pass {pass}"),
        );
        let snapshot = ctx.capture().await?;
        let plan = planner_service::plan(&snapshot, &desired);
        if plan.is_empty() {
            tracing::info!(run_id = %ctx.run_id, pass, "layout converged");
            break;
        }
        tracing::info!(
            run_id = %ctx.run_id,
            pass,
            operations = plan.operations.len(),
            "correcting drift"
        );
        let execution = executor_service::execute_plan(ctx.host, &plan, config, &recorder).await;
        report.absorb(&execution);
        report.passes += 1;
    }
    ctx.emit(
        OrganizePhase::Converging,
        config.max_convergence_passes,
        config.max_convergence_passes,
        "Verification complete",
    );

    let stragglers = stage_cleanup_stragglers(ctx, &desired).await?;
    report.straggler_tabs_moved = stragglers.tabs_moved;
    report.errors += stragglers.errors;
    report.completed_at = chrono::Utc::now().to_rfc3339();
    Ok(report)
}

fn finish_run<T>(ctx: &PipelineCtx<'_>, result: &Result<T, AppError>) {
    match result {
        Ok(_) => ctx.emit(OrganizePhase::Done, 1, 1, "Done"),
        Err(err) => {
            tracing::error!(run_id = %ctx.run_id, error = %err, "organize run failed");
            ctx.emit(OrganizePhase::Error, 0, 1, err.to_string());
        }
    }
}

/// Snapshot, solve, plan, execute, converge, then fold stragglers. Only a
/// failed browser read makes this return an error.
pub async fn run_full_pipeline(
    ctx: &PipelineCtx<'_>,
    use_classifier: bool,
) -> Result<PipelineReport, AppError> {
    let _guard = ctx.state.try_begin_organize()?;
    tracing::info!(run_id = %ctx.run_id, use_classifier, "organize run started");

    let result = run_organize(ctx, use_classifier).await;
    finish_run(ctx, &result);
    if let Ok(report) = &result {
        tracing::info!(
            run_id = %ctx.run_id,
            tabs_moved = report.tabs_moved,
            windows_created = report.windows_created,
            groups_created = report.groups_created,
            errors = report.errors,
            passes = report.passes,
            "organize run finished"
        );
    }
    result
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreview {
    pub strategy: SolverStrategy,
    pub desired: DesiredState,
    pub plan: MovePlan,
}

/// Solve and plan without touching the browser.
pub async fn preview_plan(
    ctx: &PipelineCtx<'_>,
    use_classifier: bool,
) -> Result<PlanPreview, AppError> {
    let snapshot = ctx.capture().await?;
    let (desired, strategy) = stage_solve(ctx, &snapshot, use_classifier).await;
    let plan = planner_service::plan(&snapshot, &desired);
    Ok(PlanPreview {
        strategy,
        desired,
        plan,
    })
}

/// Dissolves every native group, leaving tabs where they are.
pub async fn run_ungroup_all(ctx: &PipelineCtx<'_>) -> Result<ExecutionReport, AppError> {
    let _guard = ctx.state.try_begin_organize()?;
    let result = async {
        let snapshot = ctx.capture().await?;
        let plan = planner_service::plan_ungroup_all(&snapshot);
        let recorder = ctx.recorder();
        let report =
            executor_service::execute_plan(ctx.host, &plan, &ctx.state.config, &recorder).await;
        Ok::<_, AppError>(report)
    }
    .await;
    finish_run(ctx, &result);
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::config::OrganizeConfig;
use crate::error::AppError;
use crate::models::browser::{GroupColor, GroupId, TabId, WindowId};
use crate::models::operation::{ExecutionReport, MovePlan, Operation};
use crate::services::host::{BrowserHost, GroupUpdate, MoveTarget, TabQuery};
use crate::state::{OrganizePhase, ProgressEvent, ProgressSink};

/// Attempts per group operation, each with a fresh reconcile.
const GROUP_ATTEMPTS: usize = 2;

/// Applies one plan against the host. Operation failures are counted and
/// the run moves on; nothing short of a panic aborts the plan.
pub struct Executor<'a> {
    host: &'a dyn BrowserHost,
    config: &'a OrganizeConfig,
    progress: &'a dyn ProgressSink,
    created_windows: BTreeMap<usize, WindowId>,
    slot_targets: HashMap<usize, WindowId>,
    /// Tabs of each new-window slot that can stand in for a closed seed.
    spare_seeds: HashMap<usize, VecDeque<TabId>>,
    /// Tabs already placed by window creation; their move is dropped.
    seeded: HashSet<TabId>,
    /// New-window slots whose every tab vanished before creation.
    abandoned_slots: HashSet<usize>,
    report: ExecutionReport,
}

impl<'a> Executor<'a> {
    pub fn new(
        host: &'a dyn BrowserHost,
        config: &'a OrganizeConfig,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            host,
            config,
            progress,
            created_windows: BTreeMap::new(),
            slot_targets: HashMap::new(),
            spare_seeds: HashMap::new(),
            seeded: HashSet::new(),
            abandoned_slots: HashSet::new(),
            report: ExecutionReport::default(),
        }
    }

    pub async fn execute(mut self, plan: &MovePlan) -> ExecutionReport {
        for operation in &plan.operations {
            if let Operation::MoveTabs {
                tab_ids,
                slot_index,
                target_window_id: None,
            } = operation
            {
                self.spare_seeds
                    .entry(*slot_index)
                    .or_default()
                    .extend(tab_ids.iter().copied());
            }
        }

        let total = plan.operations.len();
        for (index, operation) in plan.operations.iter().enumerate() {
            self.progress.on_progress(ProgressEvent::new(
                OrganizePhase::Executing,
                index,
                total,
                operation.kind().to_string(),
            ));
            self.apply(operation).await;
            if index + 1 < total {
                tokio::time::sleep(self.config.domain_delay()).await;
            }
        }

        self.sweep_placeholders().await;
        self.progress.on_progress(ProgressEvent::new(
            OrganizePhase::Executing,
            total,
            total,
            "Plan applied",
        ));
        tracing::info!(
            tabs_moved = self.report.tabs_moved,
            windows_created = self.report.windows_created,
            groups_created = self.report.groups_created,
            errors = self.report.errors,
            "plan executed"
        );
        self.report
    }

    async fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::CreateWindow {
                slot_index,
                seed_tab_id,
            } => self.create_window(*slot_index, *seed_tab_id).await,
            Operation::MoveTabs {
                tab_ids,
                slot_index,
                target_window_id,
            } => self.move_tabs(tab_ids, *slot_index, *target_window_id).await,
            Operation::CreateGroup {
                tab_ids,
                title,
                color,
                slot_index,
                target_window_id,
            } => {
                self.create_group(tab_ids, title, *color, *slot_index, *target_window_id)
                    .await
            }
            Operation::UpdateGroup {
                group_id,
                title,
                color,
            } => self.update_group(*group_id, title, *color).await,
            Operation::RemoveGroup { tab_ids } => self.remove_group(tab_ids).await,
        }
    }

    fn record_failure(&mut self, action: &str, err: &AppError) {
        if err.is_vanished() {
            tracing::debug!(action, error = %err, "target vanished, skipping");
            return;
        }
        tracing::warn!(action, error = %err, "operation failed");
        self.report.errors += 1;
    }

    /// Opens the slot's window. A seed closed by the user is replaced by the
    /// next tab bound for the same window.
    async fn create_window(&mut self, slot_index: usize, seed_tab_id: TabId) {
        let mut seed = seed_tab_id;
        loop {
            match self.host.create_window(seed).await {
                Ok(window) => {
                    tracing::debug!(slot_index, window_id = window.id, seed, "window created");
                    self.created_windows.insert(slot_index, window.id);
                    self.seeded.insert(seed);
                    self.report.windows_created += 1;
                    tokio::time::sleep(self.config.window_settle()).await;
                    return;
                }
                Err(err) if err.is_vanished() => {
                    let next = self
                        .spare_seeds
                        .get_mut(&slot_index)
                        .and_then(VecDeque::pop_front);
                    match next {
                        Some(next) => {
                            tracing::debug!(slot_index, closed = seed, next, "seed vanished, reseeding");
                            seed = next;
                        }
                        None => {
                            tracing::debug!(slot_index, "every tab of the slot vanished");
                            self.abandoned_slots.insert(slot_index);
                            return;
                        }
                    }
                }
                Err(err) => {
                    self.record_failure("create_window", &err);
                    return;
                }
            }
        }
    }

    async fn move_tabs(
        &mut self,
        tab_ids: &[TabId],
        slot_index: usize,
        target_window_id: Option<WindowId>,
    ) {
        if target_window_id.is_none() && self.abandoned_slots.contains(&slot_index) {
            return;
        }
        let Some(target) =
            target_window_id.or_else(|| self.created_windows.get(&slot_index).copied())
        else {
            tracing::warn!(slot_index, "no window to move tabs into");
            self.report.errors += 1;
            return;
        };
        self.slot_targets.insert(slot_index, target);
        let tab_ids = tab_ids
            .iter()
            .copied()
            .filter(|id| !self.seeded.contains(id))
            .collect::<Vec<_>>();

        for (batch_index, batch) in tab_ids.chunks(self.config.move_batch_size.max(1)).enumerate()
        {
            if batch_index > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }
            let moved = self.move_batch(batch, target).await;
            self.report.tabs_moved += moved.len();
            if self.config.discard_moved_tabs {
                for tab_id in moved {
                    if let Err(err) = self.host.discard_tab(tab_id).await {
                        tracing::debug!(tab_id, error = %err, "discard skipped");
                    }
                }
            }
        }
    }

    /// Moves one batch with retry, then degrades to one call per tab.
    /// Returns the tabs the host accepted.
    async fn move_batch(&mut self, batch: &[TabId], target: WindowId) -> Vec<TabId> {
        let host = self.host;
        let policy = self.config.move_retry_policy();
        let result = policy
            .run(
                |_| host.move_tabs(batch, MoveTarget::append_to(target)),
                AppError::is_retryable,
            )
            .await;
        let err = match result {
            Ok(()) => return batch.to_vec(),
            Err(err) => err,
        };

        tracing::warn!(
            window_id = target,
            tabs = batch.len(),
            error = %err,
            "batch move failed, moving tabs one by one"
        );
        let mut moved = Vec::with_capacity(batch.len());
        for tab_id in batch {
            match host
                .move_tabs(std::slice::from_ref(tab_id), MoveTarget::append_to(target))
                .await
            {
                Ok(()) => moved.push(*tab_id),
                Err(err) => self.record_failure("move_tab", &err),
            }
        }
        moved
    }

    /// First tab of the list that the host still knows, by its window.
    async fn current_window_of(&self, tab_ids: &[TabId]) -> Result<Option<WindowId>, AppError> {
        let tabs = self.host.list_tabs(TabQuery::all()).await?;
        let by_id = tabs
            .iter()
            .map(|tab| (tab.id, tab.window_id))
            .collect::<HashMap<_, _>>();
        Ok(tab_ids.iter().find_map(|id| by_id.get(id).copied()))
    }

    async fn window_members(&self, window_id: WindowId) -> Result<HashSet<TabId>, AppError> {
        Ok(self
            .host
            .list_tabs(TabQuery::in_window(window_id))
            .await?
            .into_iter()
            .map(|tab| tab.id)
            .collect())
    }

    /// Re-reads the target window, pulls in any of `tab_ids` found
    /// elsewhere, and returns the ones now confirmed present.
    async fn reconcile(
        &mut self,
        target: WindowId,
        tab_ids: &[TabId],
    ) -> Result<Vec<TabId>, AppError> {
        let mut present = self.window_members(target).await?;
        let missing = tab_ids
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            tracing::debug!(
                window_id = target,
                missing = missing.len(),
                "re-moving tabs before grouping"
            );
            let moved = self.move_batch(&missing, target).await;
            self.report.tabs_moved += moved.len();
            tokio::time::sleep(self.config.batch_delay()).await;
            present = self.window_members(target).await?;
        }

        Ok(tab_ids
            .iter()
            .copied()
            .filter(|id| present.contains(id))
            .collect())
    }

    async fn resolve_group_target(
        &self,
        tab_ids: &[TabId],
        slot_index: usize,
        target_window_id: Option<WindowId>,
    ) -> Result<Option<WindowId>, AppError> {
        if let Some(window_id) = target_window_id
            .or_else(|| self.created_windows.get(&slot_index).copied())
            .or_else(|| self.slot_targets.get(&slot_index).copied())
        {
            return Ok(Some(window_id));
        }
        self.current_window_of(tab_ids).await
    }

    async fn create_group(
        &mut self,
        tab_ids: &[TabId],
        title: &str,
        color: GroupColor,
        slot_index: usize,
        target_window_id: Option<WindowId>,
    ) {
        if target_window_id.is_none() && self.abandoned_slots.contains(&slot_index) {
            tracing::debug!(title, slot_index, "window for the group was never opened");
            return;
        }
        let target = match self
            .resolve_group_target(tab_ids, slot_index, target_window_id)
            .await
        {
            Ok(Some(target)) => target,
            Ok(None) => {
                tracing::debug!(title, "every tab of the group is gone");
                return;
            }
            Err(err) => {
                self.record_failure("create_group", &err);
                return;
            }
        };

        let mut last_error = None;
        for attempt in 1..=GROUP_ATTEMPTS {
            let valid = match self.reconcile(target, tab_ids).await {
                Ok(valid) => valid,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            if valid.len() < 2 {
                let err = AppError::InvalidGroup(format!(
                    "only {} of {} tabs for \"{title}\" reached window {target}",
                    valid.len(),
                    tab_ids.len()
                ));
                tracing::warn!(error = %err, "group abandoned");
                self.report.errors += 1;
                return;
            }

            match self.host.group_tabs(target, &valid).await {
                Ok(group_id) => {
                    self.report.groups_created += 1;
                    let update = GroupUpdate {
                        title: Some(title.to_string()),
                        color: Some(color),
                    };
                    if let Err(err) = self.host.update_group(group_id, update).await {
                        self.record_failure("style_group", &err);
                    }
                    return;
                }
                Err(err) => {
                    tracing::debug!(attempt, title, error = %err, "grouping failed");
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            self.record_failure("create_group", &err);
        }
    }

    async fn update_group(&mut self, group_id: GroupId, title: &str, color: GroupColor) {
        let update = GroupUpdate {
            title: Some(title.to_string()),
            color: Some(color),
        };
        match self.host.update_group(group_id, update).await {
            Ok(()) => self.report.groups_updated += 1,
            Err(err) => self.record_failure("update_group", &err),
        }
    }

    async fn remove_group(&mut self, tab_ids: &[TabId]) {
        match self.host.ungroup_tabs(tab_ids).await {
            Ok(()) => self.report.groups_removed += 1,
            Err(err) => tracing::debug!(error = %err, "ungroup skipped"),
        }
    }

    /// Removes blank and new-tab pages the host opened in windows this plan
    /// created, unless they are all the window holds.
    async fn sweep_placeholders(&mut self) {
        let windows = self.created_windows.values().copied().collect::<Vec<_>>();
        for window_id in windows {
            let tabs = match self.host.list_tabs(TabQuery::in_window(window_id)).await {
                Ok(tabs) => tabs,
                Err(err) => {
                    tracing::debug!(window_id, error = %err, "placeholder sweep skipped");
                    continue;
                }
            };
            let placeholders = tabs
                .iter()
                .filter(|tab| tab.is_placeholder())
                .map(|tab| tab.id)
                .collect::<Vec<_>>();
            if placeholders.is_empty() || placeholders.len() == tabs.len() {
                continue;
            }
            match self.host.remove_tabs(&placeholders).await {
                Ok(()) => self.report.placeholders_removed += placeholders.len(),
                Err(err) => tracing::debug!(window_id, error = %err, "placeholder removal failed"),
            }
        }
    }
}

pub async fn execute_plan(
    host: &dyn BrowserHost,
    plan: &MovePlan,
    config: &OrganizeConfig,
    progress: &dyn ProgressSink,
) -> ExecutionReport {
    Executor::new(host, config, progress).execute(plan).await
}

use serde::{Deserialize, Serialize};

use crate::models::browser::{GroupColor, GroupId, TabId, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    CreateWindow,
    MoveTabs,
    CreateGroup,
    UpdateGroup,
    RemoveGroup,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateWindow => write!(f, "create_window"),
            Self::MoveTabs => write!(f, "move_tabs"),
            Self::CreateGroup => write!(f, "create_group"),
            Self::UpdateGroup => write!(f, "update_group"),
            Self::RemoveGroup => write!(f, "remove_group"),
        }
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_window" => Ok(Self::CreateWindow),
            "move_tabs" => Ok(Self::MoveTabs),
            "create_group" => Ok(Self::CreateGroup),
            "update_group" => Ok(Self::UpdateGroup),
            "remove_group" => Ok(Self::RemoveGroup),
            _ => Err(format!("unknown operation kind: {s}")),
        }
    }
}

/// A single host mutation. `target_window_id: None` resolves at execution
/// time to the window created for the same `slot_index` earlier in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    CreateWindow { slot_index: usize, seed_tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    MoveTabs {
        tab_ids: Vec<TabId>,
        slot_index: usize,
        target_window_id: Option<WindowId>,
    },
    #[serde(rename_all = "camelCase")]
    CreateGroup {
        tab_ids: Vec<TabId>,
        title: String,
        color: GroupColor,
        slot_index: usize,
        target_window_id: Option<WindowId>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateGroup {
        group_id: GroupId,
        title: String,
        color: GroupColor,
    },
    #[serde(rename_all = "camelCase")]
    RemoveGroup { tab_ids: Vec<TabId> },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateWindow { .. } => OperationKind::CreateWindow,
            Self::MoveTabs { .. } => OperationKind::MoveTabs,
            Self::CreateGroup { .. } => OperationKind::CreateGroup,
            Self::UpdateGroup { .. } => OperationKind::UpdateGroup,
            Self::RemoveGroup { .. } => OperationKind::RemoveGroup,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub windows_to_create: usize,
    pub tabs_to_move: usize,
    pub groups_to_create: usize,
    pub groups_to_update: usize,
    pub groups_to_remove: usize,
}

impl PlanStats {
    pub fn is_noop(&self) -> bool {
        self.windows_to_create == 0
            && self.tabs_to_move == 0
            && self.groups_to_create == 0
            && self.groups_to_update == 0
            && self.groups_to_remove == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePlan {
    pub operations: Vec<Operation>,
    pub stats: PlanStats,
}

impl MovePlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Append-only plan assembly. Operations land in per-phase lanes and are
/// concatenated window creation, then moves, then group changes, then
/// removals, whatever order the caller pushes them in.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    creates: Vec<Operation>,
    moves: Vec<Operation>,
    groups: Vec<Operation>,
    removals: Vec<Operation>,
    stats: PlanStats,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_window(&mut self, slot_index: usize, seed_tab_id: TabId) {
        self.stats.windows_to_create += 1;
        self.creates.push(Operation::CreateWindow {
            slot_index,
            seed_tab_id,
        });
    }

    pub fn move_tabs(
        &mut self,
        tab_ids: Vec<TabId>,
        slot_index: usize,
        target_window_id: Option<WindowId>,
    ) {
        if tab_ids.is_empty() {
            return;
        }
        self.stats.tabs_to_move += tab_ids.len();
        self.moves.push(Operation::MoveTabs {
            tab_ids,
            slot_index,
            target_window_id,
        });
    }

    pub fn create_group(
        &mut self,
        tab_ids: Vec<TabId>,
        title: String,
        color: GroupColor,
        slot_index: usize,
        target_window_id: Option<WindowId>,
    ) {
        self.stats.groups_to_create += 1;
        self.groups.push(Operation::CreateGroup {
            tab_ids,
            title,
            color,
            slot_index,
            target_window_id,
        });
    }

    pub fn update_group(&mut self, group_id: GroupId, title: String, color: GroupColor) {
        self.stats.groups_to_update += 1;
        self.groups.push(Operation::UpdateGroup {
            group_id,
            title,
            color,
        });
    }

    pub fn remove_group(&mut self, tab_ids: Vec<TabId>) {
        if tab_ids.is_empty() {
            return;
        }
        self.stats.groups_to_remove += 1;
        self.removals.push(Operation::RemoveGroup { tab_ids });
    }

    pub fn finish(self) -> MovePlan {
        let mut operations = self.creates;
        operations.extend(self.moves);
        operations.extend(self.groups);
        operations.extend(self.removals);
        MovePlan {
            operations,
            stats: self.stats,
        }
    }
}

/// Outcome of applying one plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub tabs_moved: usize,
    pub windows_created: usize,
    pub groups_created: usize,
    pub groups_updated: usize,
    pub groups_removed: usize,
    pub placeholders_removed: usize,
    pub errors: usize,
}

impl ExecutionReport {
    pub fn absorb(&mut self, other: &ExecutionReport) {
        self.tabs_moved += other.tabs_moved;
        self.windows_created += other.windows_created;
        self.groups_created += other.groups_created;
        self.groups_updated += other.groups_updated;
        self.groups_removed += other.groups_removed;
        self.placeholders_removed += other.placeholders_removed;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverStrategy {
    Deterministic,
    Classifier,
    /// The classifier was requested but produced nothing usable.
    ClassifierFallback,
}

/// Summary returned to the caller of a full organize run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: String,
    pub tabs_moved: usize,
    pub windows_created: usize,
    pub groups_created: usize,
    pub groups_updated: usize,
    pub groups_removed: usize,
    pub errors: usize,
    pub already_organized: bool,
    pub passes: usize,
    pub strategy: SolverStrategy,
    pub straggler_tabs_moved: usize,
    pub completed_at: String,
}

impl PipelineReport {
    pub fn new(run_id: String, strategy: SolverStrategy) -> Self {
        Self {
            run_id,
            tabs_moved: 0,
            windows_created: 0,
            groups_created: 0,
            groups_updated: 0,
            groups_removed: 0,
            errors: 0,
            already_organized: false,
            passes: 0,
            strategy,
            straggler_tabs_moved: 0,
            completed_at: String::new(),
        }
    }

    pub fn absorb(&mut self, execution: &ExecutionReport) {
        self.tabs_moved += execution.tabs_moved;
        self.windows_created += execution.windows_created;
        self.groups_created += execution.groups_created;
        self.groups_updated += execution.groups_updated;
        self.groups_removed += execution.groups_removed;
        self.errors += execution.errors;
    }
}

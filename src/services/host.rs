use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::browser::{
    GroupColor, GroupId, Tab, TabGroup, TabId, Window, WindowId, APPEND_INDEX,
};

/// Filter for `list_tabs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabQuery {
    pub window_id: Option<WindowId>,
}

impl TabQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_window(window_id: WindowId) -> Self {
        Self {
            window_id: Some(window_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTarget {
    pub window_id: WindowId,
    pub index: i32,
}

impl MoveTarget {
    pub fn append_to(window_id: WindowId) -> Self {
        Self {
            window_id,
            index: APPEND_INDEX,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub title: Option<String>,
    pub color: Option<GroupColor>,
}

/// The browser's window/tab manager. Reads are point-in-time; mutations are
/// eventually consistent and a successful call does not guarantee that a
/// following read already observes it.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// Normal-type windows only.
    async fn list_windows(&self) -> Result<Vec<Window>, AppError>;

    async fn list_tabs(&self, query: TabQuery) -> Result<Vec<Tab>, AppError>;

    async fn list_groups(&self) -> Result<Vec<TabGroup>, AppError>;

    /// Opens a window around `seed_tab_id`; the seed is moved by the call.
    async fn create_window(&self, seed_tab_id: TabId) -> Result<Window, AppError>;

    /// May fail as a whole even when only one of the tabs is at fault.
    async fn move_tabs(&self, tab_ids: &[TabId], target: MoveTarget) -> Result<(), AppError>;

    async fn group_tabs(&self, window_id: WindowId, tab_ids: &[TabId])
        -> Result<GroupId, AppError>;

    async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<(), AppError>;

    async fn ungroup_tabs(&self, tab_ids: &[TabId]) -> Result<(), AppError>;

    async fn remove_tabs(&self, tab_ids: &[TabId]) -> Result<(), AppError>;

    async fn discard_tab(&self, tab_id: TabId) -> Result<(), AppError>;
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::browser::{GroupColor, TabId};

/// One labeled cluster of tabs destined for a single native group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSlot {
    pub domain: String,
    pub tab_ids: Vec<TabId>,
    pub color: GroupColor,
    pub label: String,
}

/// One desired window, hosting one or more domain slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSlot {
    pub id: String,
    pub domains: Vec<DomainSlot>,
    pub total_tabs: usize,
}

impl WindowSlot {
    pub fn new(id: String, domains: Vec<DomainSlot>) -> Self {
        let total_tabs = domains.iter().map(|slot| slot.tab_ids.len()).sum();
        Self {
            id,
            domains,
            total_tabs,
        }
    }

    pub fn tab_ids(&self) -> impl Iterator<Item = TabId> + '_ {
        self.domains
            .iter()
            .flat_map(|slot| slot.tab_ids.iter().copied())
    }
}

/// A tab intentionally left ungrouped, labeled by its own domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTab {
    pub tab_id: TabId,
    pub domain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    pub window_slots: Vec<WindowSlot>,
    pub singles: Vec<SingleTab>,
}

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.window_slots.is_empty()
    }

    /// Every tab id placed into some window slot.
    pub fn claimed_tab_ids(&self) -> HashSet<TabId> {
        self.window_slots
            .iter()
            .flat_map(|slot| slot.tab_ids())
            .collect()
    }

    pub fn total_slotted_tabs(&self) -> usize {
        self.window_slots.iter().map(|slot| slot.total_tabs).sum()
    }
}

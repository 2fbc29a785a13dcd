use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::browser::{
    GroupColor, GroupId, Tab, TabGroup, TabId, Window, WindowId, WindowType, TAB_GROUP_ID_NONE,
};
use crate::services::host::{BrowserHost, GroupUpdate, MoveTarget, TabQuery};

const PLACEHOLDER_URL: &str = "chrome://newtab/";

/// Serialized host state: the input of the simulator and the shape printed
/// back after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFixture {
    pub windows: Vec<Window>,
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub groups: Vec<TabGroup>,
}

/// Misbehaviour to inject into the in-memory host.
#[derive(Debug, Clone, Default)]
pub struct HostFaults {
    /// Any move or window creation touching one of these tabs fails.
    pub failing_tabs: HashSet<TabId>,
    /// The next move of each of these tabs reports success but does nothing.
    pub dropped_moves: HashSet<TabId>,
    /// Every read call fails.
    pub fail_reads: bool,
    /// New windows open with an extra new-tab page next to the seed.
    pub blank_tab_on_create: bool,
}

#[derive(Debug, Default)]
struct HostModel {
    windows: Vec<Window>,
    order: HashMap<WindowId, Vec<TabId>>,
    tabs: HashMap<TabId, Tab>,
    groups: BTreeMap<GroupId, TabGroup>,
    next_window_id: WindowId,
    next_tab_id: TabId,
    next_group_id: GroupId,
    faults: HostFaults,
    mutation_calls: usize,
}

impl HostModel {
    fn from_fixture(fixture: HostFixture) -> Self {
        let mut model = HostModel::default();
        for window in fixture.windows {
            model.order.entry(window.id).or_default();
            model.windows.push(window);
        }

        let mut tabs = fixture.tabs;
        tabs.sort_by_key(|tab| (tab.window_id, tab.index, tab.id));
        for tab in tabs {
            if !model.order.contains_key(&tab.window_id) {
                model.windows.push(Window {
                    id: tab.window_id,
                    focused: false,
                    window_type: WindowType::Normal,
                });
            }
            model.order.entry(tab.window_id).or_default().push(tab.id);
            model.tabs.insert(tab.id, tab);
        }
        for group in fixture.groups {
            model.groups.insert(group.id, group);
        }

        model.next_window_id = model.windows.iter().map(|w| w.id).max().unwrap_or(0) + 1;
        model.next_tab_id = model.tabs.keys().copied().max().unwrap_or(0) + 1;
        model.next_group_id = model.groups.keys().copied().max().unwrap_or(0) + 1;
        model.prune();
        model
    }

    fn check_reads(&self) -> Result<(), AppError> {
        if self.faults.fail_reads {
            return Err(AppError::Host("browser state is unavailable".to_string()));
        }
        Ok(())
    }

    fn tab_view(&self, id: TabId) -> Option<Tab> {
        let tab = self.tabs.get(&id)?;
        let index = self
            .order
            .get(&tab.window_id)
            .and_then(|ids| ids.iter().position(|other| *other == id))
            .unwrap_or(0);
        Some(Tab {
            index,
            ..tab.clone()
        })
    }

    fn require_tabs(&self, tab_ids: &[TabId]) -> Result<(), AppError> {
        match tab_ids.iter().find(|id| !self.tabs.contains_key(*id)) {
            Some(missing) => Err(AppError::TabNotFound(*missing)),
            None => Ok(()),
        }
    }

    fn require_window(&self, window_id: WindowId) -> Result<(), AppError> {
        if self.order.contains_key(&window_id) {
            Ok(())
        } else {
            Err(AppError::WindowNotFound(window_id))
        }
    }

    fn check_failing(&self, tab_ids: &[TabId]) -> Result<(), AppError> {
        match tab_ids
            .iter()
            .find(|id| self.faults.failing_tabs.contains(*id))
        {
            Some(id) => Err(AppError::Host(format!("tab {id} cannot be edited right now"))),
            None => Ok(()),
        }
    }

    fn detach(&mut self, tab_id: TabId) {
        let Some(window_id) = self.tabs.get(&tab_id).map(|tab| tab.window_id) else {
            return;
        };
        if let Some(ids) = self.order.get_mut(&window_id) {
            ids.retain(|id| *id != tab_id);
        }
    }

    fn attach(&mut self, tab_id: TabId, window_id: WindowId, index: i32) {
        let ids = self.order.entry(window_id).or_default();
        if index < 0 || index as usize >= ids.len() {
            ids.push(tab_id);
        } else {
            ids.insert(index as usize, tab_id);
        }
        if let Some(tab) = self.tabs.get_mut(&tab_id) {
            tab.window_id = window_id;
        }
    }

    fn relocate(&mut self, tab_id: TabId, window_id: WindowId, index: i32) {
        let current = self.tabs.get(&tab_id).map(|tab| tab.window_id);
        if current == Some(window_id) {
            return;
        }
        self.detach(tab_id);
        if let Some(tab) = self.tabs.get_mut(&tab_id) {
            tab.group_id = TAB_GROUP_ID_NONE;
        }
        self.attach(tab_id, window_id, index);
    }

    /// Drops groups without members and closes windows without tabs.
    fn prune(&mut self) {
        let live_groups = self
            .tabs
            .values()
            .filter(|tab| tab.group_id != TAB_GROUP_ID_NONE)
            .map(|tab| tab.group_id)
            .collect::<HashSet<_>>();
        self.groups.retain(|id, _| live_groups.contains(id));

        let empty = self
            .order
            .iter()
            .filter(|(_, ids)| ids.is_empty())
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for window_id in empty {
            self.order.remove(&window_id);
            self.windows.retain(|window| window.id != window_id);
        }
    }

    fn fixture(&self) -> HostFixture {
        let mut tabs = Vec::new();
        for window in &self.windows {
            if let Some(ids) = self.order.get(&window.id) {
                tabs.extend(ids.iter().filter_map(|id| self.tab_view(*id)));
            }
        }
        HostFixture {
            windows: self.windows.clone(),
            tabs,
            groups: self.groups.values().cloned().collect(),
        }
    }
}

/// A deterministic, single-process stand-in for the browser.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    model: Mutex<HostModel>,
}

impl InMemoryHost {
    pub fn new(fixture: HostFixture) -> Self {
        Self {
            model: Mutex::new(HostModel::from_fixture(fixture)),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let fixture: HostFixture = serde_json::from_str(raw)?;
        Ok(Self::new(fixture))
    }

    fn lock(&self) -> MutexGuard<'_, HostModel> {
        self.model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_faults(&self, faults: HostFaults) {
        self.lock().faults = faults;
    }

    pub fn fixture(&self) -> HostFixture {
        self.lock().fixture()
    }

    pub fn mutation_calls(&self) -> usize {
        self.lock().mutation_calls
    }

    /// Tab ids of a window in tab-strip order.
    pub fn tabs_in_window(&self, window_id: WindowId) -> Vec<TabId> {
        self.lock()
            .order
            .get(&window_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.lock().windows.iter().map(|window| window.id).collect()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<Tab> {
        self.lock().tab_view(tab_id)
    }

    pub fn group(&self, group_id: GroupId) -> Option<TabGroup> {
        self.lock().groups.get(&group_id).cloned()
    }

    /// Simulates the user closing a tab outside the pipeline.
    pub fn close_tab(&self, tab_id: TabId) {
        let mut model = self.lock();
        model.detach(tab_id);
        model.tabs.remove(&tab_id);
        model.prune();
    }

    /// Simulates the user opening a tab outside the pipeline.
    pub fn open_tab(&self, window_id: WindowId, url: &str) -> TabId {
        let mut model = self.lock();
        let id = model.next_tab_id;
        model.next_tab_id += 1;
        if !model.order.contains_key(&window_id) {
            model.windows.push(Window {
                id: window_id,
                focused: false,
                window_type: WindowType::Normal,
            });
        }
        model.tabs.insert(
            id,
            Tab {
                id,
                window_id,
                index: 0,
                url: url.to_string(),
                title: String::new(),
                group_id: TAB_GROUP_ID_NONE,
                active: false,
                pinned: false,
                discarded: false,
            },
        );
        model.attach(id, window_id, -1);
        id
    }
}

#[async_trait]
impl BrowserHost for InMemoryHost {
    async fn list_windows(&self) -> Result<Vec<Window>, AppError> {
        let model = self.lock();
        model.check_reads()?;
        Ok(model
            .windows
            .iter()
            .filter(|window| window.window_type == WindowType::Normal)
            .cloned()
            .collect())
    }

    async fn list_tabs(&self, query: TabQuery) -> Result<Vec<Tab>, AppError> {
        let model = self.lock();
        model.check_reads()?;
        let mut out = Vec::new();
        for window in &model.windows {
            if query.window_id.is_some_and(|id| id != window.id) {
                continue;
            }
            if let Some(ids) = model.order.get(&window.id) {
                out.extend(ids.iter().filter_map(|id| model.tab_view(*id)));
            }
        }
        Ok(out)
    }

    async fn list_groups(&self) -> Result<Vec<TabGroup>, AppError> {
        let model = self.lock();
        model.check_reads()?;
        Ok(model.groups.values().cloned().collect())
    }

    async fn create_window(&self, seed_tab_id: TabId) -> Result<Window, AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        model.require_tabs(&[seed_tab_id])?;
        model.check_failing(&[seed_tab_id])?;

        let window = Window {
            id: model.next_window_id,
            focused: true,
            window_type: WindowType::Normal,
        };
        model.next_window_id += 1;
        model.windows.push(window.clone());
        model.order.insert(window.id, Vec::new());
        model.relocate(seed_tab_id, window.id, -1);

        if model.faults.blank_tab_on_create {
            let id = model.next_tab_id;
            model.next_tab_id += 1;
            model.tabs.insert(
                id,
                Tab {
                    id,
                    window_id: window.id,
                    index: 0,
                    url: PLACEHOLDER_URL.to_string(),
                    title: "New Tab".to_string(),
                    group_id: TAB_GROUP_ID_NONE,
                    active: true,
                    pinned: false,
                    discarded: false,
                },
            );
            model.attach(id, window.id, -1);
        }
        model.prune();
        Ok(window)
    }

    async fn move_tabs(&self, tab_ids: &[TabId], target: MoveTarget) -> Result<(), AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        model.require_window(target.window_id)?;
        model.require_tabs(tab_ids)?;
        model.check_failing(tab_ids)?;

        let mut index = target.index;
        for tab_id in tab_ids {
            if model.faults.dropped_moves.remove(tab_id) {
                continue;
            }
            model.relocate(*tab_id, target.window_id, index);
            if index >= 0 {
                index += 1;
            }
        }
        model.prune();
        Ok(())
    }

    async fn group_tabs(
        &self,
        window_id: WindowId,
        tab_ids: &[TabId],
    ) -> Result<GroupId, AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        model.require_window(window_id)?;
        if tab_ids.is_empty() {
            return Err(AppError::InvalidGroup("no tabs to group".to_string()));
        }
        model.require_tabs(tab_ids)?;
        if let Some(stray) = tab_ids
            .iter()
            .find(|id| model.tabs.get(*id).map(|tab| tab.window_id) != Some(window_id))
        {
            return Err(AppError::Host(format!(
                "tab {stray} is not in window {window_id}"
            )));
        }

        let group_id = model.next_group_id;
        model.next_group_id += 1;
        model.groups.insert(
            group_id,
            TabGroup {
                id: group_id,
                window_id,
                title: String::new(),
                color: GroupColor::Grey,
                collapsed: false,
            },
        );

        // Grouped tabs become contiguous, anchored at the first member.
        let ids = model.order.get(&window_id).cloned().unwrap_or_default();
        let anchor = ids
            .iter()
            .position(|id| tab_ids.contains(id))
            .unwrap_or(ids.len());
        let before = ids[..anchor]
            .iter()
            .filter(|id| !tab_ids.contains(*id))
            .copied();
        let after = ids[anchor..]
            .iter()
            .filter(|id| !tab_ids.contains(*id))
            .copied();
        let reordered = before
            .chain(tab_ids.iter().copied())
            .chain(after)
            .collect::<Vec<_>>();
        model.order.insert(window_id, reordered);

        for tab_id in tab_ids {
            if let Some(tab) = model.tabs.get_mut(tab_id) {
                tab.group_id = group_id;
            }
        }
        model.prune();
        Ok(group_id)
    }

    async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<(), AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        let group = model
            .groups
            .get_mut(&group_id)
            .ok_or(AppError::GroupNotFound(group_id))?;
        if let Some(title) = update.title {
            group.title = title;
        }
        if let Some(color) = update.color {
            group.color = color;
        }
        Ok(())
    }

    async fn ungroup_tabs(&self, tab_ids: &[TabId]) -> Result<(), AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        model.require_tabs(tab_ids)?;
        for tab_id in tab_ids {
            if let Some(tab) = model.tabs.get_mut(tab_id) {
                tab.group_id = TAB_GROUP_ID_NONE;
            }
        }
        model.prune();
        Ok(())
    }

    async fn remove_tabs(&self, tab_ids: &[TabId]) -> Result<(), AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        model.require_tabs(tab_ids)?;
        for tab_id in tab_ids {
            model.detach(*tab_id);
            model.tabs.remove(tab_id);
        }
        model.prune();
        Ok(())
    }

    async fn discard_tab(&self, tab_id: TabId) -> Result<(), AppError> {
        let mut model = self.lock();
        model.mutation_calls += 1;
        let tab = model
            .tabs
            .get_mut(&tab_id)
            .ok_or(AppError::TabNotFound(tab_id))?;
        if tab.active {
            return Err(AppError::Host(format!("cannot discard active tab {tab_id}")));
        }
        tab.discarded = true;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tab(id: TabId, window_id: WindowId, url: &str) -> Tab {
        Tab {
            id,
            window_id,
            index: 0,
            url: url.to_string(),
            title: String::new(),
            group_id: TAB_GROUP_ID_NONE,
            active: false,
            pinned: false,
            discarded: false,
        }
    }

    pub(crate) fn window(id: WindowId) -> Window {
        Window {
            id,
            focused: false,
            window_type: WindowType::Normal,
        }
    }

    fn two_window_host() -> InMemoryHost {
        InMemoryHost::new(HostFixture {
            windows: vec![window(1), window(2)],
            tabs: vec![
                tab(10, 1, "https://a.com/1"),
                tab(11, 1, "https://a.com/2"),
                tab(20, 2, "https://b.com/1"),
            ],
            groups: Vec::new(),
        })
    }

    #[tokio::test]
    async fn moving_last_tab_closes_source_window() {
        let host = two_window_host();
        host.move_tabs(&[20], MoveTarget::append_to(1)).await.unwrap();

        assert_eq!(host.window_ids(), vec![1]);
        assert_eq!(host.tabs_in_window(1), vec![10, 11, 20]);
    }

    #[tokio::test]
    async fn move_with_missing_tab_fails_whole_call() {
        let host = two_window_host();
        let err = host
            .move_tabs(&[20, 99], MoveTarget::append_to(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TabNotFound(99)));
        assert_eq!(host.tabs_in_window(2), vec![20]);
    }

    #[tokio::test]
    async fn grouping_requires_members_in_window() {
        let host = two_window_host();
        let err = host.group_tabs(1, &[10, 20]).await.unwrap_err();
        assert!(matches!(err, AppError::Host(_)));

        let group_id = host.group_tabs(1, &[10, 11]).await.unwrap();
        assert_eq!(host.tab(10).unwrap().group_id, group_id);
    }

    #[tokio::test]
    async fn cross_window_move_ungroups_and_prunes_group() {
        let host = two_window_host();
        let group_id = host.group_tabs(1, &[10, 11]).await.unwrap();
        host.move_tabs(&[10, 11], MoveTarget::append_to(2))
            .await
            .unwrap();

        assert!(!host.tab(10).unwrap().is_grouped());
        assert!(host.group(group_id).is_none());
    }

    #[tokio::test]
    async fn create_window_can_add_placeholder() {
        let host = two_window_host();
        host.set_faults(HostFaults {
            blank_tab_on_create: true,
            ..HostFaults::default()
        });
        let created = host.create_window(10).await.unwrap();
        let ids = host.tabs_in_window(created.id);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], 10);
        assert!(host.tab(ids[1]).unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn dropped_move_is_one_shot() {
        let host = two_window_host();
        host.set_faults(HostFaults {
            dropped_moves: [20].into_iter().collect(),
            ..HostFaults::default()
        });
        host.move_tabs(&[20], MoveTarget::append_to(1)).await.unwrap();
        assert_eq!(host.tab(20).unwrap().window_id, 2);

        host.move_tabs(&[20], MoveTarget::append_to(1)).await.unwrap();
        assert_eq!(host.tab(20).unwrap().window_id, 1);
    }

    #[tokio::test]
    async fn fixture_round_trips_through_json() {
        let raw = r#"{
            "windows": [{"id": 5}],
            "tabs": [
                {"id": 1, "windowId": 5, "index": 1, "url": "https://b.com"},
                {"id": 2, "windowId": 5, "index": 0, "url": "https://a.com"}
            ]
        }"#;
        let host = InMemoryHost::from_json(raw).unwrap();
        assert_eq!(host.tabs_in_window(5), vec![2, 1]);
        let tabs = host.list_tabs(TabQuery::in_window(5)).await.unwrap();
        assert_eq!(tabs[1].index, 1);
    }
}

use std::collections::{BTreeMap, HashMap};

use crate::error::AppError;
use crate::models::browser::{GroupId, Tab, TabGroup, TabId, Window, WindowId};
use crate::services::host::{BrowserHost, TabQuery};

/// Domain used for tabs whose URL has no parseable hostname.
pub const OTHER_DOMAIN: &str = "other";

pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_ascii_lowercase()))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| OTHER_DOMAIN.to_string())
}

/// Read-only, point-in-time view of the browser. Superseded, never mutated.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub windows: Vec<Window>,
    pub tabs: Vec<Tab>,
    pub tab_groups: Vec<TabGroup>,
    pub tabs_by_id: HashMap<TabId, Tab>,
    /// Tab ids per window, in tab-strip order.
    pub tabs_by_window: BTreeMap<WindowId, Vec<TabId>>,
    /// Tab ids per domain, in (window, index) order.
    pub tabs_by_domain: BTreeMap<String, Vec<TabId>>,
    pub groups_by_id: HashMap<GroupId, TabGroup>,
    domains: HashMap<TabId, String>,
}

impl Snapshot {
    pub fn from_parts(windows: Vec<Window>, tabs: Vec<Tab>, tab_groups: Vec<TabGroup>) -> Self {
        let mut ordered = tabs.clone();
        ordered.sort_by_key(|tab| (tab.window_id, tab.index, tab.id));

        let mut tabs_by_id = HashMap::with_capacity(tabs.len());
        let mut tabs_by_window: BTreeMap<WindowId, Vec<TabId>> = BTreeMap::new();
        let mut tabs_by_domain: BTreeMap<String, Vec<TabId>> = BTreeMap::new();
        let mut domains = HashMap::with_capacity(tabs.len());

        for tab in &ordered {
            let domain = domain_of(&tab.url);
            tabs_by_window.entry(tab.window_id).or_default().push(tab.id);
            tabs_by_domain
                .entry(domain.clone())
                .or_default()
                .push(tab.id);
            domains.insert(tab.id, domain);
            tabs_by_id.insert(tab.id, tab.clone());
        }

        let groups_by_id = tab_groups
            .iter()
            .map(|group| (group.id, group.clone()))
            .collect();

        Self {
            windows,
            tabs,
            tab_groups,
            tabs_by_id,
            tabs_by_window,
            tabs_by_domain,
            groups_by_id,
            domains,
        }
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&Tab> {
        self.tabs_by_id.get(&tab_id)
    }

    pub fn contains_tab(&self, tab_id: TabId) -> bool {
        self.tabs_by_id.contains_key(&tab_id)
    }

    pub fn window_of(&self, tab_id: TabId) -> Option<WindowId> {
        self.tabs_by_id.get(&tab_id).map(|tab| tab.window_id)
    }

    pub fn domain(&self, tab_id: TabId) -> &str {
        self.domains
            .get(&tab_id)
            .map(String::as_str)
            .unwrap_or(OTHER_DOMAIN)
    }

    pub fn tabs_in_window(&self, window_id: WindowId) -> &[TabId] {
        self.tabs_by_window
            .get(&window_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Member tab ids of each native group, in tab-strip order.
    pub fn group_members(&self) -> HashMap<GroupId, Vec<TabId>> {
        let mut members: HashMap<GroupId, Vec<TabId>> = HashMap::new();
        for ids in self.tabs_by_window.values() {
            for id in ids {
                if let Some(tab) = self.tabs_by_id.get(id).filter(|tab| tab.is_grouped()) {
                    members.entry(tab.group_id).or_default().push(*id);
                }
            }
        }
        members
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

/// Reads windows, tabs and groups concurrently and indexes them. Any read
/// failure aborts the capture.
pub async fn capture(host: &dyn BrowserHost) -> Result<Snapshot, AppError> {
    let (windows, tabs, groups) = tokio::try_join!(
        host.list_windows(),
        host.list_tabs(TabQuery::all()),
        host.list_groups(),
    )?;
    tracing::debug!(
        windows = windows.len(),
        tabs = tabs.len(),
        groups = groups.len(),
        "captured browser snapshot"
    );
    Ok(Snapshot::from_parts(windows, tabs, groups))
}

use std::collections::HashSet;

use crate::models::browser::{TabGroup, TabId, WindowId};
use crate::models::layout::{DesiredState, DomainSlot};
use crate::models::operation::{MovePlan, PlanBuilder};
use crate::services::snapshot_service::Snapshot;

/// Tabs of the slot that still exist, in slot order.
fn live_tabs(snapshot: &Snapshot, tab_ids: impl Iterator<Item = TabId>) -> Vec<TabId> {
    tab_ids.filter(|id| snapshot.contains_tab(*id)).collect()
}

/// Greedy match: the unclaimed window already holding the most of `tabs`.
/// Equal overlap keeps the earlier window in snapshot order.
fn best_window(
    snapshot: &Snapshot,
    tabs: &[TabId],
    claimed: &HashSet<WindowId>,
) -> Option<WindowId> {
    let mut best: Option<(WindowId, usize)> = None;
    for window in &snapshot.windows {
        if claimed.contains(&window.id) {
            continue;
        }
        let overlap = tabs
            .iter()
            .filter(|id| snapshot.window_of(**id) == Some(window.id))
            .count();
        if overlap > 0 && best.map_or(true, |(_, top)| overlap > top) {
            best = Some((window.id, overlap));
        }
    }
    best.map(|(window_id, _)| window_id)
}

/// Native group in `window_id` whose members are exactly `tabs`.
fn matching_group<'a>(
    snapshot: &'a Snapshot,
    window_id: WindowId,
    tabs: &[TabId],
) -> Option<&'a TabGroup> {
    let wanted = tabs.iter().copied().collect::<HashSet<_>>();
    let members = snapshot.group_members();
    snapshot
        .tab_groups
        .iter()
        .filter(|group| group.window_id == window_id)
        .find(|group| {
            members.get(&group.id).is_some_and(|ids| {
                ids.len() == wanted.len() && ids.iter().all(|id| wanted.contains(id))
            })
        })
}

fn plan_groups(
    builder: &mut PlanBuilder,
    snapshot: &Snapshot,
    domain: &DomainSlot,
    slot_index: usize,
    target: Option<WindowId>,
) {
    let tabs = live_tabs(snapshot, domain.tab_ids.iter().copied());
    if tabs.len() < 2 {
        return;
    }
    if let Some(window_id) = target {
        if let Some(group) = matching_group(snapshot, window_id, &tabs) {
            if group.title != domain.label {
                builder.update_group(group.id, domain.label.clone(), domain.color);
            }
            return;
        }
    }
    builder.create_group(
        tabs,
        domain.label.clone(),
        domain.color,
        slot_index,
        target,
    );
}

/// Diffs `snapshot` against `desired`. Pure; the same inputs always yield
/// the same plan.
pub fn plan(snapshot: &Snapshot, desired: &DesiredState) -> MovePlan {
    let mut builder = PlanBuilder::new();
    let mut claimed = HashSet::new();

    for (slot_index, slot) in desired.window_slots.iter().enumerate() {
        let tabs = live_tabs(snapshot, slot.tab_ids());
        let Some(first) = tabs.first().copied() else {
            continue;
        };

        let target = match best_window(snapshot, &tabs, &claimed) {
            Some(window_id) => {
                claimed.insert(window_id);
                let strays = tabs
                    .iter()
                    .copied()
                    .filter(|id| snapshot.window_of(*id) != Some(window_id))
                    .collect();
                builder.move_tabs(strays, slot_index, Some(window_id));
                Some(window_id)
            }
            None => {
                builder.create_window(slot_index, first);
                builder.move_tabs(tabs[1..].to_vec(), slot_index, None);
                None
            }
        };

        for domain in &slot.domains {
            plan_groups(&mut builder, snapshot, domain, slot_index, target);
        }
    }

    let plan = builder.finish();
    tracing::debug!(
        operations = plan.operations.len(),
        windows = plan.stats.windows_to_create,
        moves = plan.stats.tabs_to_move,
        groups = plan.stats.groups_to_create,
        "planned pass"
    );
    plan
}

/// One REMOVE_GROUP per native group that still has members.
pub fn plan_ungroup_all(snapshot: &Snapshot) -> MovePlan {
    let mut builder = PlanBuilder::new();
    let members = snapshot.group_members();
    for group in &snapshot.tab_groups {
        if let Some(ids) = members.get(&group.id) {
            builder.remove_group(ids.clone());
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrganizeConfig;
    use crate::models::browser::{GroupColor, TabGroup};
    use crate::models::layout::WindowSlot;
    use crate::models::operation::{Operation, OperationKind};
    use crate::services::solver_service::solve_deterministic;
    use crate::services::solver_service::tests::snapshot_of;

    fn slot(id: &str, domains: Vec<(&str, Vec<TabId>)>) -> WindowSlot {
        WindowSlot::new(
            id.to_string(),
            domains
                .into_iter()
                .map(|(domain, tab_ids)| DomainSlot {
                    domain: domain.to_string(),
                    label: domain.to_string(),
                    tab_ids,
                    color: GroupColor::Blue,
                })
                .collect(),
        )
    }

    fn desired(slots: Vec<WindowSlot>) -> DesiredState {
        DesiredState {
            window_slots: slots,
            singles: Vec::new(),
        }
    }

    fn with_group(snapshot: &Snapshot, group: TabGroup, members: &[TabId]) -> Snapshot {
        let tabs = snapshot
            .tabs
            .iter()
            .cloned()
            .map(|mut tab| {
                if members.contains(&tab.id) {
                    tab.group_id = group.id;
                }
                tab
            })
            .collect();
        let mut groups = snapshot.tab_groups.clone();
        groups.push(group);
        Snapshot::from_parts(snapshot.windows.clone(), tabs, groups)
    }

    fn group(id: i64, window_id: i64, title: &str) -> TabGroup {
        TabGroup {
            id,
            window_id,
            title: title.to_string(),
            color: GroupColor::Blue,
            collapsed: false,
        }
    }

    fn kinds(plan: &MovePlan) -> Vec<OperationKind> {
        plan.operations.iter().map(Operation::kind).collect()
    }

    #[test]
    fn small_run_groups_in_place() {
        let snapshot = snapshot_of(&[(
            1,
            &[
                (1, "https://a.com/1"),
                (2, "https://a.com/2"),
                (3, "https://a.com/3"),
                (4, "https://b.com/1"),
                (5, "https://b.com/2"),
            ],
        )]);
        let desired = solve_deterministic(&snapshot, &OrganizeConfig::default());
        let plan = plan(&snapshot, &desired);

        assert_eq!(
            kinds(&plan),
            vec![OperationKind::CreateGroup, OperationKind::CreateGroup]
        );
        assert_eq!(plan.stats.tabs_to_move, 0);
        match &plan.operations[0] {
            Operation::CreateGroup {
                tab_ids,
                title,
                target_window_id,
                ..
            } => {
                assert_eq!(tab_ids, &vec![1, 2, 3]);
                assert_eq!(title, "a.com");
                assert_eq!(*target_window_id, Some(1));
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn matching_layout_yields_empty_plan() {
        let base = snapshot_of(&[(1, &[(1, "https://a.com/1"), (2, "https://a.com/2")])]);
        let snapshot = with_group(&base, group(7, 1, "a.com"), &[1, 2]);
        let plan = plan(&snapshot, &desired(vec![slot("slot-0", vec![("a.com", vec![1, 2])])]));
        assert!(plan.is_empty());
        assert!(plan.stats.is_noop());
    }

    #[test]
    fn retitled_group_is_updated_not_recreated() {
        let base = snapshot_of(&[(1, &[(1, "https://a.com/1"), (2, "https://a.com/2")])]);
        let snapshot = with_group(&base, group(7, 1, "old name"), &[1, 2]);
        let plan = plan(&snapshot, &desired(vec![slot("slot-0", vec![("a.com", vec![1, 2])])]));

        assert_eq!(
            plan.operations,
            vec![Operation::UpdateGroup {
                group_id: 7,
                title: "a.com".to_string(),
                color: GroupColor::Blue,
            }]
        );
        assert_eq!(plan.stats.groups_to_update, 1);
    }

    #[test]
    fn unmatched_slot_creates_window_seeded_with_first_tab() {
        let snapshot = snapshot_of(&[
            (1, &[(1, "https://a.com/1"), (2, "https://a.com/2")]),
            (2, &[(3, "https://b.com/1"), (4, "https://b.com/2")]),
        ]);
        let plan = plan(
            &snapshot,
            &desired(vec![
                slot("slot-0", vec![("a.com", vec![1, 2]), ("b.com", vec![3, 4])]),
                slot("slot-1", vec![("b.com", vec![3, 4])]),
            ]),
        );

        // slot-0 wins window 1 (overlap 2, earlier than window 2), slot-1
        // then takes window 2.
        assert_eq!(
            plan.operations[0],
            Operation::MoveTabs {
                tab_ids: vec![3, 4],
                slot_index: 0,
                target_window_id: Some(1),
            }
        );
        assert_eq!(plan.stats.windows_to_create, 0);

        let fresh = plan_with_no_overlap();
        assert_eq!(
            kinds(&fresh),
            vec![
                OperationKind::CreateWindow,
                OperationKind::MoveTabs,
                OperationKind::CreateGroup,
            ]
        );
        assert_eq!(
            fresh.operations[0],
            Operation::CreateWindow {
                slot_index: 1,
                seed_tab_id: 2,
            }
        );
        assert_eq!(
            fresh.operations[1],
            Operation::MoveTabs {
                tab_ids: vec![3],
                slot_index: 1,
                target_window_id: None,
            }
        );
    }

    fn plan_with_no_overlap() -> MovePlan {
        let snapshot = snapshot_of(&[(
            1,
            &[
                (1, "https://a.com/1"),
                (2, "https://b.com/1"),
                (3, "https://b.com/2"),
            ],
        )]);
        // slot-0 claims window 1, so slot-1 has no unclaimed window left.
        plan(
            &snapshot,
            &desired(vec![
                slot("slot-0", vec![("a.com", vec![1])]),
                slot("slot-1", vec![("b.com", vec![2, 3])]),
            ]),
        )
    }

    #[test]
    fn equal_overlap_prefers_earlier_window() {
        let snapshot = snapshot_of(&[
            (5, &[(1, "https://a.com/1")]),
            (9, &[(2, "https://a.com/2")]),
        ]);
        let plan = plan(&snapshot, &desired(vec![slot("slot-0", vec![("a.com", vec![1, 2])])]));
        assert_eq!(
            plan.operations[0],
            Operation::MoveTabs {
                tab_ids: vec![2],
                slot_index: 0,
                target_window_id: Some(5),
            }
        );
    }

    #[test]
    fn single_tab_domains_never_get_groups() {
        let snapshot = snapshot_of(&[(1, &[(1, "https://a.com/1"), (2, "https://b.com/1")])]);
        let plan = plan(
            &snapshot,
            &desired(vec![slot("slot-0", vec![("a.com", vec![1]), ("b.com", vec![2])])]),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn stale_tabs_are_ignored() {
        let snapshot = snapshot_of(&[(1, &[(1, "https://a.com/1"), (2, "https://a.com/2")])]);
        let plan = plan(
            &snapshot,
            &desired(vec![
                slot("slot-0", vec![("a.com", vec![1, 2, 99])]),
                slot("slot-1", vec![("gone.com", vec![100, 101])]),
            ]),
        );
        assert_eq!(kinds(&plan), vec![OperationKind::CreateGroup]);
        match &plan.operations[0] {
            Operation::CreateGroup { tab_ids, .. } => assert_eq!(tab_ids, &vec![1, 2]),
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn ungroup_all_removes_every_group() {
        let base = snapshot_of(&[(
            1,
            &[
                (1, "https://a.com/1"),
                (2, "https://a.com/2"),
                (3, "https://b.com/1"),
                (4, "https://b.com/2"),
            ],
        )]);
        let once = with_group(&base, group(7, 1, "a"), &[1, 2]);
        let twice = with_group(&once, group(8, 1, "b"), &[3, 4]);

        let plan = plan_ungroup_all(&twice);
        assert_eq!(plan.stats.groups_to_remove, 2);
        assert_eq!(
            plan.operations,
            vec![
                Operation::RemoveGroup { tab_ids: vec![1, 2] },
                Operation::RemoveGroup { tab_ids: vec![3, 4] },
            ]
        );
    }
}

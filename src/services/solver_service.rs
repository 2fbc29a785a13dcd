use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::OrganizeConfig;
use crate::models::browser::{GroupColor, TabId};
use crate::models::layout::{DesiredState, DomainSlot, SingleTab, WindowSlot};
use crate::services::snapshot_service::Snapshot;

/// Size bucket of a domain; drives how the solver places it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainTier {
    Single,
    Small,
    Big,
    Huge,
}

pub fn classify_tier(tab_count: usize, config: &OrganizeConfig) -> DomainTier {
    match tab_count {
        0 | 1 => DomainTier::Single,
        n if n <= config.small_group_limit => DomainTier::Small,
        n if n <= config.window_cap => DomainTier::Big,
        _ => DomainTier::Huge,
    }
}

/// Round-robin palette, independent of domain identity.
#[derive(Debug, Default)]
pub struct ColorCycle {
    next: usize,
}

impl ColorCycle {
    pub fn next_color(&mut self) -> GroupColor {
        let color = GroupColor::PALETTE[self.next % GroupColor::PALETTE.len()];
        self.next += 1;
        color
    }
}

pub fn slot_id(index: usize) -> String {
    format!("slot-{index}")
}

/// First-fit-decreasing over `(item, size)` pairs. Items larger than `cap`
/// get a bin of their own. Ties keep input order.
pub fn pack_first_fit_decreasing<T>(mut items: Vec<(T, usize)>, cap: usize) -> Vec<Vec<T>> {
    items.sort_by(|a, b| b.1.cmp(&a.1));

    let mut bins: Vec<(usize, Vec<T>)> = Vec::new();
    for (item, size) in items {
        if size > cap {
            bins.push((size, vec![item]));
            continue;
        }
        match bins.iter_mut().find(|(load, _)| *load + size <= cap) {
            Some((load, members)) => {
                *load += size;
                members.push(item);
            }
            None => bins.push((size, vec![item])),
        }
    }
    bins.into_iter().map(|(_, members)| members).collect()
}

/// Packs clusters into window slots, numbering slots from `first_index`.
pub fn pack_domain_slots(
    slots: Vec<DomainSlot>,
    cap: usize,
    first_index: usize,
) -> Vec<WindowSlot> {
    let sized = slots
        .into_iter()
        .map(|slot| {
            let size = slot.tab_ids.len();
            (slot, size)
        })
        .collect::<Vec<_>>();
    pack_first_fit_decreasing(sized, cap)
        .into_iter()
        .enumerate()
        .map(|(offset, domains)| WindowSlot::new(slot_id(first_index + offset), domains))
        .collect()
}

fn eligible_tabs_by_domain(
    snapshot: &Snapshot,
    config: &OrganizeConfig,
) -> BTreeMap<String, Vec<TabId>> {
    snapshot
        .tabs_by_domain
        .iter()
        .map(|(domain, ids)| {
            let ids = ids
                .iter()
                .copied()
                .filter(|id| {
                    !config.exclude_pinned
                        || snapshot.tab(*id).map(|tab| !tab.pinned).unwrap_or(false)
                })
                .collect::<Vec<_>>();
            (domain.clone(), ids)
        })
        .filter(|(_, ids)| !ids.is_empty())
        .collect()
}

/// Idealized domain layout: huge domains sharded one window per shard, big
/// domains one window each, small domains bin-packed, singles left alone.
pub fn solve_deterministic(snapshot: &Snapshot, config: &OrganizeConfig) -> DesiredState {
    let by_domain = eligible_tabs_by_domain(snapshot, config);

    let mut huge: Vec<(String, Vec<TabId>)> = Vec::new();
    let mut big: Vec<(String, Vec<TabId>)> = Vec::new();
    let mut small: Vec<(String, Vec<TabId>)> = Vec::new();
    let mut singles = Vec::new();

    for (domain, ids) in by_domain {
        match classify_tier(ids.len(), config) {
            DomainTier::Single => singles.extend(ids.into_iter().map(|tab_id| SingleTab {
                tab_id,
                domain: domain.clone(),
            })),
            DomainTier::Small => small.push((domain, ids)),
            DomainTier::Big => big.push((domain, ids)),
            DomainTier::Huge => huge.push((domain, ids)),
        }
    }
    huge.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    big.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut colors = ColorCycle::default();
    let mut window_slots = Vec::new();

    for (domain, ids) in huge {
        for (shard, chunk) in ids.chunks(config.shard_size.max(1)).enumerate() {
            let slot = DomainSlot {
                label: format!("{}-{domain}", shard + 1),
                domain: domain.clone(),
                tab_ids: chunk.to_vec(),
                color: colors.next_color(),
            };
            window_slots.push(WindowSlot::new(slot_id(window_slots.len()), vec![slot]));
        }
    }

    for (domain, ids) in big {
        let slot = DomainSlot {
            label: domain.clone(),
            domain,
            tab_ids: ids,
            color: colors.next_color(),
        };
        window_slots.push(WindowSlot::new(slot_id(window_slots.len()), vec![slot]));
    }

    let sized = small
        .into_iter()
        .map(|(domain, ids)| {
            let size = ids.len();
            ((domain, ids), size)
        })
        .collect::<Vec<_>>();
    for bin in pack_first_fit_decreasing(sized, config.window_cap) {
        let domains = bin
            .into_iter()
            .map(|(domain, ids)| DomainSlot {
                label: domain.clone(),
                domain,
                tab_ids: ids,
                color: colors.next_color(),
            })
            .collect::<Vec<_>>();
        window_slots.push(WindowSlot::new(slot_id(window_slots.len()), domains));
    }

    tracing::debug!(
        window_slots = window_slots.len(),
        singles = singles.len(),
        "deterministic layout solved"
    );

    DesiredState {
        window_slots,
        singles,
    }
}

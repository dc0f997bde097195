// Rank role convergence.
//
// Stateless: every call recomputes what the member should hold from the level
// alone, so a missed event, an edited ladder or a level drop heals itself on
// the next grant.

use super::leveling_models::{RankThreshold, WindowMode};
use super::rank_thresholds::{resolve_rank, ResolvedRank};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDelta {
    pub add: BTreeSet<u64>,
    pub remove: BTreeSet<u64>,
}

impl RoleDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Union of two deltas. A role in both sets is kept: add wins.
    pub fn merge(mut self, other: RoleDelta) -> RoleDelta {
        self.add.extend(other.add);
        self.remove.extend(other.remove);
        let added = &self.add;
        self.remove.retain(|role| !added.contains(role));
        self
    }

    /// Drop adds for roles the guild no longer has. Returns the dropped ids.
    pub fn retain_existing(&mut self, guild_roles: &HashSet<u64>) -> Vec<u64> {
        let missing: Vec<u64> = self
            .add
            .iter()
            .filter(|role| !guild_roles.contains(role))
            .copied()
            .collect();
        for role in &missing {
            self.add.remove(role);
        }
        missing
    }
}

/// Role changes for one window mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTransition {
    pub previous: Option<ResolvedRank>,
    pub current: Option<ResolvedRank>,
    pub delta: RoleDelta,
}

impl RankTransition {
    /// The member moved to a strictly higher rank.
    pub fn ranked_up(&self) -> Option<ResolvedRank> {
        let current = self.current?;
        match self.previous {
            Some(previous) if previous.index >= current.index => None,
            _ => Some(current),
        }
    }
}

/// A promotion worth announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankUp {
    pub mode: WindowMode,
    pub role_id: u64,
    pub level: u32,
}

/// What a sync actually changed on the platform.
#[derive(Debug, Clone, Default)]
pub struct RoleSyncReport {
    pub added: Vec<u64>,
    pub removed: Vec<u64>,
    /// Rank roles that were due but no longer exist in the guild.
    pub missing_roles: Vec<u64>,
    pub ranked_up: Vec<RankUp>,
    /// Role id and error text for calls the platform rejected.
    pub failures: Vec<(u64, String)>,
}

pub fn compute_role_delta(
    previous_level: u32,
    new_level: u32,
    thresholds: &[RankThreshold],
    current_roles: &HashSet<u64>,
) -> RankTransition {
    let previous = resolve_rank(previous_level, thresholds);
    let current = resolve_rank(new_level, thresholds);

    let mut delta = RoleDelta::default();
    if let Some(rank) = current {
        if !current_roles.contains(&rank.role_id) {
            delta.add.insert(rank.role_id);
        }
    }
    for (index, threshold) in thresholds.iter().enumerate() {
        let is_assigned = current.map_or(false, |rank| rank.index == index);
        if !is_assigned && current_roles.contains(&threshold.role_id) {
            delta.remove.insert(threshold.role_id);
        }
    }

    RankTransition {
        previous,
        current,
        delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u64 = 11;
    const B: u64 = 12;
    const C: u64 = 13;

    fn ladder(mode: WindowMode, roles: [u64; 3]) -> Vec<RankThreshold> {
        [(roles[0], 5), (roles[1], 10), (roles[2], 20)]
            .into_iter()
            .map(|(role_id, level)| RankThreshold {
                guild_id: 1,
                role_id,
                level,
                mode,
            })
            .collect()
    }

    fn held(roles: &[u64]) -> HashSet<u64> {
        roles.iter().copied().collect()
    }

    #[test]
    fn promotion_swaps_every_stale_rank_role() {
        let thresholds = ladder(WindowMode::Lifetime, [A, B, C]);
        let transition = compute_role_delta(8, 22, &thresholds, &held(&[A, B]));

        assert_eq!(transition.delta.add, BTreeSet::from([C]));
        assert_eq!(transition.delta.remove, BTreeSet::from([A, B]));
        assert_eq!(transition.ranked_up().map(|r| r.role_id), Some(C));
    }

    #[test]
    fn applying_the_delta_converges() {
        let thresholds = ladder(WindowMode::Lifetime, [A, B, C]);
        let mut roles = held(&[A, B, 777]);
        let first = compute_role_delta(8, 22, &thresholds, &roles);
        roles.extend(first.delta.add.iter().copied());
        roles.retain(|r| !first.delta.remove.contains(r));

        let second = compute_role_delta(8, 22, &thresholds, &roles);
        assert!(second.delta.is_empty());
        assert!(roles.contains(&777), "unrelated roles are untouched");
    }

    #[test]
    fn dropping_below_the_ladder_removes_rank_roles() {
        let thresholds = ladder(WindowMode::Seasonal, [A, B, C]);
        let transition = compute_role_delta(12, 0, &thresholds, &held(&[B]));

        assert!(transition.delta.add.is_empty());
        assert_eq!(transition.delta.remove, BTreeSet::from([B]));
        assert_eq!(transition.current, None);
        assert_eq!(transition.ranked_up(), None);
    }

    #[test]
    fn no_rank_up_when_staying_on_the_same_rung() {
        let thresholds = ladder(WindowMode::Lifetime, [A, B, C]);
        let transition = compute_role_delta(11, 12, &thresholds, &held(&[]));
        assert_eq!(transition.delta.add, BTreeSet::from([B]));
        assert_eq!(transition.ranked_up(), None);
    }

    #[test]
    fn merged_deltas_let_add_win() {
        let seasonal = RoleDelta {
            add: BTreeSet::from([A]),
            remove: BTreeSet::from([B]),
        };
        let lifetime = RoleDelta {
            add: BTreeSet::from([B]),
            remove: BTreeSet::from([A, C]),
        };
        let merged = seasonal.merge(lifetime);

        assert_eq!(merged.add, BTreeSet::from([A, B]));
        assert_eq!(merged.remove, BTreeSet::from([C]));
    }

    #[test]
    fn deleted_roles_are_reported_not_added() {
        let mut delta = RoleDelta {
            add: BTreeSet::from([A, C]),
            remove: BTreeSet::new(),
        };
        let missing = delta.retain_existing(&held(&[A, B]));
        assert_eq!(missing, vec![C]);
        assert_eq!(delta.add, BTreeSet::from([A]));
    }
}

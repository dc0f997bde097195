// Level -> rank role resolution.

use super::leveling_models::RankThreshold;
use super::leveling_store::LevelingError;

/// The rank a level resolves to: the role and its position in the ascending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRank {
    pub role_id: u64,
    pub index: usize,
}

/// Highest threshold not exceeding `level`. `None` below the first threshold.
///
/// `thresholds` must be ascending by level with no repeats, which
/// `check_new_threshold` guarantees for anything that reached the store.
pub fn resolve_rank(level: u32, thresholds: &[RankThreshold]) -> Option<ResolvedRank> {
    let qualified = thresholds.partition_point(|t| t.level <= level);
    qualified.checked_sub(1).map(|index| ResolvedRank {
        role_id: thresholds[index].role_id,
        index,
    })
}

/// Reject a threshold that would break strict ordering or role uniqueness.
///
/// `existing` must hold every threshold of the guild across both window modes:
/// a role carries one rank rule at most, and levels only need to be unique
/// within the candidate's own mode.
pub fn check_new_threshold(
    existing: &[RankThreshold],
    candidate: &RankThreshold,
) -> Result<(), LevelingError> {
    if candidate.level == 0 {
        return Err(LevelingError::InvalidArgument(
            "rank thresholds start at level 1".to_string(),
        ));
    }
    let clash = existing.iter().any(|t| {
        t.role_id == candidate.role_id || (t.mode == candidate.mode && t.level == candidate.level)
    });
    if clash {
        return Err(LevelingError::DuplicateThreshold {
            role_id: candidate.role_id,
            level: candidate.level,
        });
    }
    Ok(())
}

/// Sort ascending by level. Stores use this after loading rows.
pub fn sort_thresholds(thresholds: &mut [RankThreshold]) {
    thresholds.sort_by_key(|t| (t.level, t.role_id));
}

//! Set algebra over per-group entity matches.

use std::collections::HashSet;

use uuid::Uuid;

use stratum_core::TagMatchMode;

/// Outcome of evaluating one filter group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatch {
    /// The criterion named no existing tag.
    Unresolved,
    /// Entities carrying at least one of the group's tags.
    Entities(HashSet<Uuid>),
}

impl GroupMatch {
    pub fn entities(&self) -> Option<&HashSet<Uuid>> {
        match self {
            Self::Unresolved => None,
            Self::Entities(ids) => Some(ids),
        }
    }
}

/// Combine group matches under the given mode.
///
/// `Any` unions every group. `All` intersects the resolved groups; unresolved
/// groups contribute nothing, and the result is empty only when no group
/// resolved at all.
pub fn combine_groups(groups: &[GroupMatch], mode: TagMatchMode) -> HashSet<Uuid> {
    let mut resolved = groups.iter().filter_map(GroupMatch::entities);

    match mode {
        TagMatchMode::Any => resolved.flatten().copied().collect(),
        TagMatchMode::All => {
            let Some(first) = resolved.next() else {
                return HashSet::new();
            };
            resolved.fold(first.clone(), |acc, ids| {
                acc.intersection(ids).copied().collect()
            })
        }
    }
}

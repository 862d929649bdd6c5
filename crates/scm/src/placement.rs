//! Container placement policies.
//!
//! The policy set is closed and selected by name from configuration; there
//! is no runtime plugin loading.

use std::collections::HashSet;

use common::{DatanodeDetails, DatanodeId, NodeStat};
use rand::seq::SliceRandom;

use crate::error::ScmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPolicy {
    /// Uniform choice among eligible nodes.
    Random,
    /// Greedy by remaining bytes.
    Capacity,
}

impl PlacementPolicy {
    pub fn from_name(name: &str) -> Result<Self, ScmError> {
        match name {
            "random" => Ok(PlacementPolicy::Random),
            "capacity" => Ok(PlacementPolicy::Capacity),
            other => Err(ScmError::UnknownPlacementPolicy(other.to_string())),
        }
    }

    /// Pick `count` distinct nodes from `candidates`, preferring nodes
    /// outside `excluded`. When the preference cannot be satisfied the
    /// exclusion is dropped: containers may share members, they just prefer
    /// not to. Fails only when the candidate set itself is too small.
    pub fn choose(
        &self,
        candidates: &[(DatanodeDetails, NodeStat)],
        count: usize,
        excluded: &HashSet<DatanodeId>,
    ) -> Result<Vec<DatanodeDetails>, ScmError> {
        let preferred: Vec<&(DatanodeDetails, NodeStat)> = candidates
            .iter()
            .filter(|(d, _)| !excluded.contains(&d.id))
            .collect();
        let pool: Vec<&(DatanodeDetails, NodeStat)> = if preferred.len() >= count {
            preferred
        } else {
            candidates.iter().collect()
        };
        if pool.len() < count {
            return Err(ScmError::InsufficientNodes {
                needed: count,
                available: pool.len(),
            });
        }

        let chosen: Vec<DatanodeDetails> = match self {
            PlacementPolicy::Random => {
                let mut rng = rand::thread_rng();
                pool.choose_multiple(&mut rng, count)
                    .map(|(d, _)| d.clone())
                    .collect()
            }
            PlacementPolicy::Capacity => {
                let mut sorted = pool;
                sorted.sort_by(|a, b| b.1.remaining.cmp(&a.1.remaining));
                sorted.into_iter().take(count).map(|(d, _)| d.clone()).collect()
            }
        };
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16, remaining: u64) -> (DatanodeDetails, NodeStat) {
        (
            DatanodeDetails {
                id: DatanodeId::new(),
                host_name: format!("dn{}", port),
                ip_address: "127.0.0.1".to_string(),
                container_port: port,
            },
            NodeStat::new(1000, 1000 - remaining, remaining),
        )
    }

    #[test]
    fn random_picks_distinct_members() {
        let candidates = vec![node(1, 10), node(2, 10), node(3, 10)];
        let chosen = PlacementPolicy::Random
            .choose(&candidates, 3, &HashSet::new())
            .unwrap();
        assert_eq!(chosen.len(), 3);
        let ids: HashSet<DatanodeId> = chosen.iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn too_few_candidates_fails() {
        let candidates = vec![node(1, 10), node(2, 10)];
        let err = PlacementPolicy::Random
            .choose(&candidates, 3, &HashSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ScmError::InsufficientNodes {
                needed: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn exclusion_is_preference_not_veto() {
        let candidates = vec![node(1, 10), node(2, 10), node(3, 10)];
        let excluded: HashSet<DatanodeId> =
            candidates.iter().map(|(d, _)| d.id).collect();
        // All candidates excluded: falls back to reuse rather than failing.
        let chosen = PlacementPolicy::Random
            .choose(&candidates, 3, &excluded)
            .unwrap();
        assert_eq!(chosen.len(), 3);
    }

    #[test]
    fn exclusion_preferred_when_possible() {
        let candidates = vec![node(1, 10), node(2, 10), node(3, 10)];
        let excluded: HashSet<DatanodeId> = [candidates[0].0.id].into_iter().collect();
        let chosen = PlacementPolicy::Random
            .choose(&candidates, 2, &excluded)
            .unwrap();
        assert!(chosen.iter().all(|d| d.id != candidates[0].0.id));
    }

    #[test]
    fn capacity_prefers_most_remaining() {
        let candidates = vec![node(1, 5), node(2, 50), node(3, 500)];
        let chosen = PlacementPolicy::Capacity
            .choose(&candidates, 2, &HashSet::new())
            .unwrap();
        let ports: Vec<u16> = chosen.iter().map(|d| d.container_port).collect();
        assert_eq!(ports, vec![3, 2]);
    }

    #[test]
    fn unknown_policy_name_is_rejected() {
        assert!(PlacementPolicy::from_name("rack_aware").is_err());
        assert_eq!(
            PlacementPolicy::from_name("random").unwrap(),
            PlacementPolicy::Random
        );
    }
}

//! Candidate filtering and ordering over one gossip snapshot.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use crate::types::{MemberInfo, NodePreference, NodeState};

/// Pure ranking policy: dead and disallowed members are dropped, the rest
/// sort by preference priority. Ties break by a fresh uniform random draw
/// so equally ranked nodes share the load instead of herding onto one.
#[derive(Debug, Clone, Copy)]
pub struct NodeRankingPolicy {
    preference: NodePreference,
}

impl NodeRankingPolicy {
    /// Policy for the given preference.
    #[must_use]
    pub const fn new(preference: NodePreference) -> Self {
        Self { preference }
    }

    /// Rank `members` best-first. An empty result is a failed attempt for
    /// the caller, not a hard error.
    pub fn rank(&self, members: &[MemberInfo], rng: &mut SmallRng) -> Vec<MemberInfo> {
        let mut candidates: Vec<MemberInfo> = members
            .iter()
            .filter(|member| member.is_alive && member.state.is_allowed())
            .cloned()
            .collect();

        // Shuffle first: the stable sort below keeps the randomized order
        // within each priority class.
        candidates.shuffle(rng);
        candidates.sort_by_key(|member| self.priority(member.state));
        candidates
    }

    fn priority(&self, state: NodeState) -> u8 {
        match self.preference {
            NodePreference::Leader => match state {
                NodeState::Leader => 0,
                NodeState::Follower => 1,
                NodeState::ReadOnlyReplica => 2,
                _ => u8::MAX,
            },
            NodePreference::Follower => match state {
                NodeState::Follower => 0,
                NodeState::Leader => 1,
                NodeState::ReadOnlyReplica => 2,
                _ => u8::MAX,
            },
            NodePreference::ReadOnlyReplica => match state {
                NodeState::ReadOnlyReplica => 0,
                NodeState::Follower => 1,
                NodeState::Leader => 2,
                _ => u8::MAX,
            },
            NodePreference::Random => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn member(port: u16, state: NodeState, is_alive: bool) -> MemberInfo {
        MemberInfo {
            instance_id: Uuid::new_v4(),
            state,
            is_alive,
            endpoint: Endpoint::new("node", port),
        }
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(0x5eed)
    }

    #[test]
    fn top_choice_is_always_an_allowed_state() {
        let members = vec![
            member(1, NodeState::Manager, true),
            member(2, NodeState::Shutdown, true),
            member(3, NodeState::Follower, true),
            member(4, NodeState::CatchingUp, true),
        ];
        let mut rng = rng();
        for preference in [
            NodePreference::Leader,
            NodePreference::Follower,
            NodePreference::ReadOnlyReplica,
            NodePreference::Random,
        ] {
            let ranked = NodeRankingPolicy::new(preference).rank(&members, &mut rng);
            assert_eq!(ranked.len(), 1);
            assert!(ranked[0].state.is_allowed());
        }
    }

    #[test]
    fn leader_preference_picks_the_leader_when_one_exists() {
        let members = vec![
            member(1, NodeState::Follower, true),
            member(2, NodeState::Leader, true),
            member(3, NodeState::ReadOnlyReplica, true),
        ];
        let policy = NodeRankingPolicy::new(NodePreference::Leader);
        let mut rng = rng();
        for _ in 0..64 {
            let ranked = policy.rank(&members, &mut rng);
            assert_eq!(ranked[0].state, NodeState::Leader);
        }
    }

    #[test]
    fn dead_members_never_rank() {
        let members = vec![
            member(1, NodeState::Leader, false),
            member(2, NodeState::Follower, true),
        ];
        let ranked = NodeRankingPolicy::new(NodePreference::Leader).rank(&members, &mut rng());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].endpoint.port, 2);
    }

    #[test]
    fn all_disallowed_yields_no_candidate() {
        let members = vec![
            member(1, NodeState::Manager, true),
            member(2, NodeState::ShuttingDown, true),
        ];
        let ranked = NodeRankingPolicy::new(NodePreference::Leader).rank(&members, &mut rng());
        assert!(ranked.is_empty());
    }

    #[test]
    fn random_preference_spreads_uniformly() {
        let members: Vec<MemberInfo> = (0..4)
            .map(|port| member(port, NodeState::Follower, true))
            .collect();
        let policy = NodeRankingPolicy::new(NodePreference::Random);
        let mut rng = rng();

        let mut counts = [0usize; 4];
        for _ in 0..2_000 {
            let ranked = policy.rank(&members, &mut rng);
            counts[ranked[0].endpoint.port as usize] += 1;
        }

        // 2000 draws over 4 members: expect ~500 each; wide bounds keep the
        // test stable across rand versions.
        for count in counts {
            assert!(count > 350, "member picked only {count} times");
            assert!(count < 650, "member picked {count} times");
        }
    }

    #[test]
    fn equal_rank_ties_are_randomized_not_list_ordered() {
        let members: Vec<MemberInfo> = (0..3)
            .map(|port| member(port, NodeState::Follower, true))
            .collect();
        let policy = NodeRankingPolicy::new(NodePreference::Follower);
        let mut rng = rng();

        let first_picks: std::collections::HashSet<u16> = (0..64)
            .map(|_| policy.rank(&members, &mut rng)[0].endpoint.port)
            .collect();
        assert!(
            first_picks.len() > 1,
            "tie-break always chose the same member"
        );
    }
}

//! Random assignment of waiting candidates to shard substitute lists.

use std::collections::BTreeMap;

use crate::types::{CommitteePublicKey, ShardId};

/// Deterministic modular distribution of `candidates` across shards.
///
/// Slots are drawn by repeatedly picking the shard with the fewest pending
/// validators (lowest id on ties), which equalises shard sizes; the epoch
/// random number then rotates which candidate lands in which slot.
pub fn assign_v2(
    candidates: &[CommitteePublicKey],
    num_validators_per_shard: &BTreeMap<ShardId, usize>,
    random_number: u64,
) -> BTreeMap<ShardId, Vec<CommitteePublicKey>> {
    let mut assigned: BTreeMap<ShardId, Vec<CommitteePublicKey>> = BTreeMap::new();
    if candidates.is_empty() || num_validators_per_shard.is_empty() {
        return assigned;
    }

    let mut counts = num_validators_per_shard.clone();
    let mut slots: Vec<ShardId> = Vec::with_capacity(candidates.len());
    for _ in 0..candidates.len() {
        let (&shard, _) = counts
            .iter()
            .min_by_key(|(shard, count)| (**count, **shard))
            .expect("counts is non-empty");
        slots.push(shard);
        *counts.get_mut(&shard).expect("shard present") += 1;
    }

    let offset = (random_number % candidates.len() as u64) as usize;
    for (index, candidate) in candidates.iter().enumerate() {
        let shard = slots[(index + offset) % slots.len()];
        assigned.entry(shard).or_default().push(candidate.clone());
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(entries: &[(ShardId, usize)]) -> BTreeMap<ShardId, usize> {
        entries.iter().copied().collect()
    }

    fn candidates(n: usize) -> Vec<CommitteePublicKey> {
        (0..n).map(|i| format!("cand-{i:02}")).collect()
    }

    #[test]
    fn equalises_shard_sizes() {
        let assigned = assign_v2(&candidates(4), &sizes(&[(0, 5), (1, 1)]), 9);
        // Shard 1 is four behind, so it absorbs every slot.
        assert_eq!(assigned.get(&1).map(Vec::len), Some(4));
        assert!(!assigned.contains_key(&0));
    }

    #[test]
    fn is_deterministic_and_random_sensitive() {
        let cands = candidates(6);
        let shards = sizes(&[(0, 2), (1, 2), (2, 2)]);
        let first = assign_v2(&cands, &shards, 42);
        let again = assign_v2(&cands, &shards, 42);
        let other = assign_v2(&cands, &shards, 43);
        assert_eq!(first, again);
        assert_ne!(first, other);
        let total: usize = first.values().map(Vec::len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn every_candidate_is_placed_exactly_once() {
        let cands = candidates(7);
        let assigned = assign_v2(&cands, &sizes(&[(0, 0), (1, 3)]), 1_234_567);
        let mut placed: Vec<_> = assigned.values().flatten().cloned().collect();
        placed.sort();
        let mut expected = cands.clone();
        expected.sort();
        assert_eq!(placed, expected);
    }
}

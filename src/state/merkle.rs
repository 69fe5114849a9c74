/// Compute a binary merkle root over the provided leaves.
///
/// Leaves are hashed as provided and sorted lexicographically before building
/// the tree to guarantee deterministic aggregation across modules.
pub fn compute_merkle_root(leaves: &mut Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return *blake3::hash(b"portal-empty").as_bytes();
    }
    leaves.sort();
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let left = chunk[0];
            let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&left);
            data.extend_from_slice(&right);
            next.push(*blake3::hash(&data).as_bytes());
        }
        *leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_order_independent() {
        let mut forward = vec![[1u8; 32], [2u8; 32], [3u8; 32]];
        let mut reversed = vec![[3u8; 32], [2u8; 32], [1u8; 32]];
        assert_eq!(
            compute_merkle_root(&mut forward),
            compute_merkle_root(&mut reversed)
        );
    }

    #[test]
    fn empty_root_is_fixed() {
        let mut none: Vec<[u8; 32]> = Vec::new();
        assert_eq!(compute_merkle_root(&mut none), compute_merkle_root(&mut Vec::new()));
    }
}

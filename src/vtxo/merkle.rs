//! Deterministic Merkle root over vtxo ids (spec §4.2, §8 "Merkle
//! determinism"): leaves are `sha256(vtxo_id)`, pairwise-hashed upward,
//! duplicating the last hash on odd levels. A single-leaf group is the one
//! documented exception: the root is the `vtxo_id` itself, verbatim, not
//! its hash.

use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hash_pair(a: &str, b: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(a.as_bytes());
    hasher.update(b.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes the Merkle root over an ordered multiset of vtxo ids. Ordering
/// is the caller's responsibility (spec §8 only promises determinism "given
/// the same ordered multiset").
pub fn merkle_root(vtxo_ids: &[String]) -> Option<String> {
    if vtxo_ids.is_empty() {
        return None;
    }
    if vtxo_ids.len() == 1 {
        return Some(vtxo_ids[0].clone());
    }

    let mut level: Vec<String> = vtxo_ids.iter().map(|id| sha256_hex(id.as_bytes())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            if i + 1 < level.len() {
                next.push(hash_pair(&level[i], &level[i + 1]));
            } else {
                next.push(hash_pair(&level[i], &level[i]));
            }
            i += 2;
        }
        level = next;
    }

    Some(level.into_iter().next().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_root() {
        assert_eq!(merkle_root(&[]), None);
    }

    #[test]
    fn single_leaf_root_is_the_vtxo_id_verbatim() {
        let id = "a".to_string();
        let root = merkle_root(&[id.clone()]).unwrap();
        assert_eq!(root, id);
    }

    #[test]
    fn three_leaves_duplicate_last_hash_on_odd_level() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let h_a = sha256_hex(b"a");
        let h_b = sha256_hex(b"b");
        let h_c = sha256_hex(b"c");
        let level1_0 = hash_pair(&h_a, &h_b);
        let level1_1 = hash_pair(&h_c, &h_c);
        let expected = hash_pair(&level1_0, &level1_1);

        assert_eq!(merkle_root(&ids).unwrap(), expected);
    }

    #[test]
    fn deterministic_across_reruns() {
        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string(), "w".to_string()];
        assert_eq!(merkle_root(&ids), merkle_root(&ids));
    }
}

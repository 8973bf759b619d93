use std::fmt;

use sha2::{Digest as _, Sha256};

/// A SHA-256 digest, either a chunk leaf or an interior tree node.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Leaf digest of one chunk.
    pub fn of(data: &[u8]) -> Digest {
        Digest(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hash: &str) -> Result<Digest, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hash, &mut bytes)?;
        Ok(Digest(bytes))
    }

    fn join(a: &Digest, b: &Digest) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(a.0);
        hasher.update(b.0);
        Digest(hasher.finalize().into())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Reduce a level of digests to the root of the archive tree hash.
///
/// Adjacent digests are paired left to right and replaced by the hash of
/// their concatenation, an odd digest at the end of a level is promoted
/// unchanged. An empty level hashes to the digest of the empty string.
pub fn tree_hash(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return Digest::of(b"");
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => Digest::join(a, b),
                [a] => *a,
                _ => unreachable!("chunks(2) yields one or two digests"),
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Digest> {
        (0..n).map(|i| Digest::of(&[i])).collect()
    }

    #[test]
    fn empty_is_hash_of_nothing() {
        assert_eq!(
            tree_hash(&[]).to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_digest_is_root() {
        let d = Digest::of(b"Hello World!");
        assert_eq!(tree_hash(&[d]), d);
    }

    #[test]
    fn pair_is_hash_of_concat() {
        let l = leaves(2);
        let mut concat = Vec::new();
        concat.extend_from_slice(l[0].as_bytes());
        concat.extend_from_slice(l[1].as_bytes());

        assert_eq!(tree_hash(&l), Digest::of(&concat));
    }

    #[test]
    fn odd_digest_is_carried() {
        let l = leaves(3);
        let first = tree_hash(&l[..2]);

        assert_eq!(tree_hash(&l), tree_hash(&[first, l[2]]));
        assert_ne!(tree_hash(&l), tree_hash(&[first, Digest::join(&l[2], &l[2])]));
    }

    #[test]
    fn five_leaves_carry_twice() {
        let l = leaves(5);
        let left = tree_hash(&l[..4]);

        assert_eq!(tree_hash(&l), Digest::join(&left, &l[4]));
    }

    #[test]
    fn deterministic_and_sensitive() {
        let l = leaves(7);
        assert_eq!(tree_hash(&l), tree_hash(&leaves(7)));

        for i in 0..l.len() {
            let mut changed = l.clone();
            changed[i] = Digest::of(b"changed");
            assert_ne!(tree_hash(&l), tree_hash(&changed), "leaf {}", i);
        }
    }

    #[test]
    fn hex_roundtrip() {
        let d = Digest::of(b"abc");
        assert_eq!(Digest::from_hex(&d.to_hex()).unwrap(), d);
        assert!(Digest::from_hex("abc").is_err());
    }
}

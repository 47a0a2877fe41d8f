use std::fmt::Debug;

use sha2::{Digest, Sha256};

use crate::UID_SEPARATOR;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("sub index count must be greater than zero")]
    NoSubIndexes,

    #[error("alias {alias} is not mapped to any sub index")]
    UnmappedAlias { alias: String },
}

/// Maps a resource identity onto the name of the sub-index that owns it.
///
/// Implementations must be pure: identical inputs yield the identical
/// partition name across calls, processes and restarts. Documents are never
/// rebalanced, so changing the mapping requires a full reindex.
pub trait SubIndexHash: Send + Sync + Debug {
    fn sub_indexes(&self) -> &[String];

    fn map_sub_index(&self, alias: &str, id_values: &[&str]) -> Result<&str, RoutingError>;
}

/// Default routing strategy: modulo hashing over the canonical
/// concatenation of the ordered id values, selecting one of a fixed set of
/// pre-computed partition names (`{prefix}_0 .. {prefix}_{n-1}`).
#[derive(Debug, Clone)]
pub struct ModuloSubIndexHash {
    sub_indexes: Vec<String>,
    aliases: Option<Vec<String>>,
}

impl ModuloSubIndexHash {
    pub fn new(prefix: &str, count: usize) -> Result<Self, RoutingError> {
        if count == 0 {
            return Err(RoutingError::NoSubIndexes);
        }
        let sub_indexes = (0..count).map(|i| format!("{}_{}", prefix, i)).collect();
        Ok(Self {
            sub_indexes,
            aliases: None,
        })
    }

    /// Restricts the hash to a fixed set of aliases; mapping any other
    /// alias fails instead of routing it silently.
    pub fn with_aliases(
        prefix: &str,
        count: usize,
        aliases: Vec<String>,
    ) -> Result<Self, RoutingError> {
        let mut hash = Self::new(prefix, count)?;
        hash.aliases = Some(aliases);
        Ok(hash)
    }

    fn bucket(&self, id_values: &[&str]) -> usize {
        let mut hasher = Sha256::new();
        for value in id_values {
            hasher.update(value.as_bytes());
            hasher.update([UID_SEPARATOR as u8]);
        }
        let digest = hasher.finalize();
        let n = u64::from_be_bytes(digest[..8].try_into().unwrap());
        (n % self.sub_indexes.len() as u64) as usize
    }
}

impl SubIndexHash for ModuloSubIndexHash {
    fn sub_indexes(&self) -> &[String] {
        &self.sub_indexes
    }

    fn map_sub_index(&self, alias: &str, id_values: &[&str]) -> Result<&str, RoutingError> {
        if let Some(aliases) = &self.aliases {
            if !aliases.iter().any(|a| a == alias) {
                return Err(RoutingError::UnmappedAlias {
                    alias: alias.to_string(),
                });
            }
        }
        Ok(&self.sub_indexes[self.bucket(id_values)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_sub_index_is_deterministic() {
        let hash = ModuloSubIndexHash::new("index", 2).unwrap();
        let first = hash.map_sub_index("a", &["1"]).unwrap().to_string();
        for _ in 0..100 {
            assert_eq!(hash.map_sub_index("a", &["1"]).unwrap(), first);
        }

        // a fresh instance routes identically
        let other = ModuloSubIndexHash::new("index", 2).unwrap();
        assert_eq!(other.map_sub_index("a", &["1"]).unwrap(), first);
    }

    #[test]
    fn test_sub_index_names() {
        let hash = ModuloSubIndexHash::new("index", 3).unwrap();
        assert_eq!(hash.sub_indexes(), &["index_0", "index_1", "index_2"]);
    }

    #[test]
    fn test_zero_sub_indexes_is_an_error() {
        assert!(matches!(
            ModuloSubIndexHash::new("index", 0),
            Err(RoutingError::NoSubIndexes)
        ));
    }

    #[test]
    fn test_unmapped_alias() {
        let hash =
            ModuloSubIndexHash::with_aliases("index", 2, vec!["a".to_string()]).unwrap();
        assert!(hash.map_sub_index("a", &["1"]).is_ok());
        assert!(matches!(
            hash.map_sub_index("b", &["1"]),
            Err(RoutingError::UnmappedAlias { .. })
        ));
    }

    #[test]
    fn test_routing_only_depends_on_id_values() {
        let hash = ModuloSubIndexHash::new("index", 5).unwrap();
        let a = hash.map_sub_index("a", &["42", "7"]).unwrap();
        let b = hash.map_sub_index("b", &["42", "7"]).unwrap();
        assert_eq!(a, b);
    }
}

pub mod routing;
pub mod test_objects;

use std::{
    fmt::{self, Display},
    hash::{DefaultHasher, Hash, Hasher},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Separator used when deriving a resource's UID from its alias and id
/// values. Id values must not contain this character; the mapping layer is
/// expected to guarantee that, it is not validated here.
pub const UID_SEPARATOR: char = '#';

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Identity of a logical document: an alias plus the ordered id values of
/// the resource. Immutable after construction, so the derived UID and hash
/// are computed once and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceKey {
    alias: String,
    ids: Vec<Property>,
    uid: String,
    hash: u64,
}

impl ResourceKey {
    pub fn new(alias: impl Into<String>, ids: Vec<Property>) -> Self {
        let alias = alias.into();
        let mut uid = String::with_capacity(alias.len() + ids.len() * 8 + 1);
        uid.push_str(&alias);
        uid.push(UID_SEPARATOR);
        for id in &ids {
            uid.push_str(&id.value);
            uid.push(UID_SEPARATOR);
        }
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        let hash = hasher.finish();
        Self {
            alias,
            ids,
            uid,
            hash,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn ids(&self) -> &[Property] {
        &self.ids
    }

    pub fn id_values(&self) -> Vec<&str> {
        self.ids.iter().map(|id| id.value.as_str()).collect()
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias &&
            self.ids.len() == other.ids.len() &&
            self.ids
                .iter()
                .zip(other.ids.iter())
                .all(|(a, b)| a.value == b.value)
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uid)
    }
}

/// An identity-bearing record produced by the external mapping layer:
/// alias, ordered id properties and any additional properties. Treated as
/// opaque and already validated.
#[derive(Debug, Clone, Serialize, Deserialize, Builder, PartialEq, Eq)]
pub struct Resource {
    pub alias: String,
    pub ids: Vec<Property>,
    #[builder(default)]
    pub properties: Vec<Property>,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.alias.clone(), self.ids.clone())
    }

    pub fn uid(&self) -> String {
        self.key().uid().to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::{test_objects::tests::test_resource, Property, ResourceKey};

    #[test]
    fn test_resource_key_uid_format() {
        let key = ResourceKey::new("a", vec![Property::new("id", "1")]);
        assert_eq!(key.uid(), "a#1#");

        let key = ResourceKey::new(
            "order",
            vec![Property::new("customer", "42"), Property::new("seq", "7")],
        );
        assert_eq!(key.uid(), "order#42#7#");
    }

    #[test]
    fn test_resource_key_equality_is_positional() {
        let a = ResourceKey::new("a", vec![Property::new("id", "1")]);
        let b = ResourceKey::new("a", vec![Property::new("renamed", "1")]);
        let c = ResourceKey::new("a", vec![Property::new("id", "2")]);
        let d = ResourceKey::new("b", vec![Property::new("id", "1")]);

        // id property names do not participate in equality, values do
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_resource_key_hash_is_cached_and_consistent() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(ResourceKey::new("a", vec![Property::new("id", "1")]));
        assert!(set.contains(&ResourceKey::new("a", vec![Property::new("id", "1")])));
        assert!(!set.contains(&ResourceKey::new("a", vec![Property::new("id", "2")])));
    }

    #[test]
    fn test_resource_derives_its_key() {
        let resource = test_resource("a", &["1"]);
        assert_eq!(resource.uid(), "a#1#");
        assert_eq!(resource.key().alias(), "a");
    }
}

//! Module that allows to (de-)serialize a `BTreeMap` with arbitrary (e.g., tuple or struct) keys
//! with `serde`. JSON only allows string keys, so the map is written as a list of entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Helper struct that allows (de-)serialization of a `BTreeMap` as this type.
///
/// Example:
/// ```ignore
/// serde_json::to_string_pretty(&SerializeMap::from(map))?;
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializeMap<K: Ord, V>(
    #[serde(with = "super::generic_hashmap")]
    #[serde(bound(
        deserialize = "K: Ord, for<'de_k> K: Deserialize<'de_k>, for<'de_v> V: Deserialize<'de_v>",
        serialize = "K: Serialize, V: Serialize",
    ))]
    pub BTreeMap<K, V>,
);

impl<K: Ord, V> From<BTreeMap<K, V>> for SerializeMap<K, V> {
    fn from(map: BTreeMap<K, V>) -> Self {
        Self(map)
    }
}

impl<K: Ord, V> From<SerializeMap<K, V>> for BTreeMap<K, V> {
    fn from(val: SerializeMap<K, V>) -> Self {
        val.0
    }
}

/// Helper struct that allows (de-)serialization of a single entry.
#[derive(Deserialize, Serialize)]
struct Entry<K, V> {
    key: K,
    val: V,
}

/// Serialize a map whose key is not a string, in ascending key order.
///
/// NOTE: taken from <https://github.com/serde-rs/json/issues/456>
pub fn serialize<K: Serialize, V: Serialize, S: Serializer>(
    map: &BTreeMap<K, V>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(map.iter().map(|(key, val)| Entry { key, val }))
}

/// Deserialize a map whose key is not a string. Later entries overwrite earlier ones.
///
/// NOTE: taken from <https://github.com/serde-rs/json/issues/456>
pub fn deserialize<'de, K: Deserialize<'de> + Ord, V: Deserialize<'de>, D>(
    deserializer: D,
) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Entry<K, V>>::deserialize(deserializer)
        .map(|v| v.into_iter().map(|entry| (entry.key, entry.val)).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tuple_keys_as_entry_list() {
        let mut map = BTreeMap::new();
        map.insert((2u32, "b".to_string()), 20u64);
        map.insert((1u32, "a".to_string()), 10u64);

        let json = serde_json::to_string(&SerializeMap::from(map.clone())).unwrap();
        assert_eq!(
            json,
            r#"[{"key":[1,"a"],"val":10},{"key":[2,"b"],"val":20}]"#
        );

        let back: SerializeMap<(u32, String), u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(BTreeMap::from(back), map);
    }
}

use serde_json::{Map, Value};

/// Open-ended key/value bag attached to events. `Value::Null` marks a key
/// that was set without a value.
pub type Attributes = Map<String, Value>;

/// Merge `overrides` on top of `base`; keys in `overrides` win.
pub fn merge(base: &Attributes, overrides: &Attributes) -> Attributes {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Extend `target` in place with `other`, last write wins.
pub fn extend(target: &mut Attributes, other: &Attributes) {
    for (k, v) in other {
        target.insert(k.clone(), v.clone());
    }
}

/// Build an attribute map from `(key, value)` pairs.
pub fn from_pairs<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

//! Ordered keyword-argument mappings with deterministic identity.
//!
//! Metric domain kwargs and value kwargs are both plain string-keyed JSON
//! mappings. Keys are kept sorted so that two mappings with the same content
//! always produce the same [`Kwargs::to_id`], which is what memoization and
//! aggregate bundling key on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{ExpectationsError, Result};

/// Identifier used for an empty mapping.
pub const EMPTY_KWARGS_ID: &str = "()";

/// A sorted mapping of keyword arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kwargs(BTreeMap<String, Value>);

/// Domain kwargs select which rows and columns a metric reads.
pub type DomainKwargs = Kwargs;

/// Value kwargs parameterize a metric without changing the data it reads.
pub type ValueKwargs = Kwargs;

impl Kwargs {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds kwargs from a JSON object. `null` yields an empty mapping.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Self::new()),
            other => Err(ExpectationsError::configuration(format!(
                "kwargs must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the key is present, even with a null value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns true if the key is present with a non-null value.
    pub fn has_value(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_null())
    }

    /// Returns a string value; null and non-strings yield `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Returns a numeric value as f64.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Returns an array value.
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    /// Returns an array of strings, skipping non-string entries.
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.get_array(key).map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }

    /// Returns a required string value or a configuration error naming the key.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| {
            ExpectationsError::configuration(format!("missing required string kwarg '{}'", key))
        })
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy restricted to the given keys.
    pub fn subset(&self, keys: &[&str]) -> Self {
        self.0
            .iter()
            .filter(|(k, _)| keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a copy without the given keys.
    pub fn without(&self, keys: &[&str]) -> Self {
        self.0
            .iter()
            .filter(|(k, _)| !keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a copy without null-valued entries.
    pub fn without_nulls(&self) -> Self {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a copy with `other`'s entries layered on top.
    pub fn merged(&self, other: &Kwargs) -> Self {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.0.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Deterministic identity: `"()"` when empty, canonical JSON otherwise.
    pub fn to_id(&self) -> String {
        if self.0.is_empty() {
            return EMPTY_KWARGS_ID.to_string();
        }
        serde_json::to_string(&self.0).unwrap_or_else(|_| format!("{:?}", self.0))
    }

    /// Converts to a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Consumes into a JSON map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0.into_iter().collect()
    }
}

impl FromIterator<(String, Value)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Kwargs {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Map<String, Value>> for Kwargs {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Kwargs {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds a [`Kwargs`] from `key => value` pairs.
///
/// ```rust
/// use dqverify_core::kwargs;
///
/// let kwargs = kwargs! { "column" => "a", "mostly" => 0.9 };
/// assert_eq!(kwargs.get_str("column"), Some("a"));
/// ```
#[macro_export]
macro_rules! kwargs {
    () => { $crate::kwargs::Kwargs::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut kwargs = $crate::kwargs::Kwargs::new();
        $( kwargs.insert($key, ::serde_json::json!($value)); )+
        kwargs
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_kwargs_id() {
        assert_eq!(Kwargs::new().to_id(), "()");
    }

    #[test]
    fn test_id_is_order_independent() {
        let a = Kwargs::new().with("column", "a").with("batch_id", "b1");
        let b = Kwargs::new().with("batch_id", "b1").with("column", "a");
        assert_eq!(a.to_id(), b.to_id());
    }

    #[test]
    fn test_id_distinguishes_values() {
        let a = Kwargs::new().with("column", "a");
        let b = Kwargs::new().with("column", "b");
        assert_ne!(a.to_id(), b.to_id());
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = Kwargs::from_json(json!({"result_format": {"b": 1, "a": 2}})).unwrap();
        let b = Kwargs::from_json(json!({"result_format": {"a": 2, "b": 1}})).unwrap();
        assert_eq!(a.to_id(), b.to_id());
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Kwargs::from_json(json!([1, 2])).is_err());
        assert!(Kwargs::from_json(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_subset_and_without_partition() {
        let kwargs = Kwargs::new()
            .with("column", "a")
            .with("row_condition", "col(\"b\") > 1")
            .with("batch_id", "x");
        let accessor = kwargs.subset(&["column"]);
        let compute = kwargs.without(&["column"]);
        assert_eq!(accessor.merged(&compute), kwargs);
    }

    #[test]
    fn test_kwargs_macro() {
        let kwargs = kwargs! { "column" => "a", "mostly" => 0.5 };
        assert_eq!(kwargs.get_str("column"), Some("a"));
        assert_eq!(kwargs.get_f64("mostly"), Some(0.5));
        assert!(kwargs! {}.is_empty());
    }
}

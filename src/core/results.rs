use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::error::SimError;

/// A value in a result map: numeric, string, or a nested map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Num(f64),
    Int(i64),
    Str(String),
    Map(ResultMap),
}

impl ResultValue {
    /// Numeric view of this value, if it has one.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            ResultValue::Num(v) => Some(*v),
            ResultValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl From<f64> for ResultValue {
    fn from(v: f64) -> Self {
        ResultValue::Num(v)
    }
}

impl From<i64> for ResultValue {
    fn from(v: i64) -> Self {
        ResultValue::Int(v)
    }
}

impl From<&str> for ResultValue {
    fn from(v: &str) -> Self {
        ResultValue::Str(v.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(v: String) -> Self {
        ResultValue::Str(v)
    }
}

impl From<ResultMap> for ResultValue {
    fn from(v: ResultMap) -> Self {
        ResultValue::Map(v)
    }
}

/// String-keyed result container produced at the end of a run.
///
/// Keys are unique: collectors registering a key that already exists fail
/// with [`SimError::DuplicateResultKey`]. Iteration order is the key order,
/// so serialized output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultMap {
    entries: BTreeMap<String, ResultValue>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entry; fails if `key` is already present.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ResultValue>,
    ) -> Result<(), SimError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(SimError::DuplicateResultKey(key));
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    /// Inserts or overwrites. Reserved for driver-owned keys such as
    /// `abortCount`; collectors use [`ResultMap::put`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ResultValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ResultValue> {
        self.entries.get(key)
    }

    /// Numeric value under `key`, if present and numeric.
    pub fn num(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ResultValue::as_num)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultValue)> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a ResultMap {
    type Item = (&'a String, &'a ResultValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ResultValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

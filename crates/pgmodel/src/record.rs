//! Plain-data records.
//!
//! A [`Record`] is an ordered column -> [`Value`] map. It is what mutation
//! builders accept as input and what `exec()` returns after loading rows
//! through a model's fields.

use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// An ordered column -> value map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// # Example
    /// ```ignore
    /// let rec = Record::new().with("name", "First Blog").with("rating", 5);
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut rec = Record::new();
        for (k, v) in iter {
            rec.insert(k, v);
        }
        rec
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, &v.to_json())?;
        }
        map.end()
    }
}

/// Rows handed to a mutation builder: one record or a batch.
///
/// The distinction matters for error reporting: a failing batch row is
/// reported with its index.
#[derive(Debug, Clone)]
pub enum Rows {
    One(Record),
    Many(Vec<Record>),
}

impl Rows {
    pub fn is_batch(&self) -> bool {
        matches!(self, Rows::Many(_))
    }

    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Rows::One(r) => vec![r],
            Rows::Many(rs) => rs,
        }
    }
}

impl From<Record> for Rows {
    fn from(r: Record) -> Self {
        Rows::One(r)
    }
}

impl From<Vec<Record>> for Rows {
    fn from(rs: Vec<Record>) -> Self {
        Rows::Many(rs)
    }
}

impl<const N: usize> From<[Record; N]> for Rows {
    fn from(rs: [Record; N]) -> Self {
        Rows::Many(rs.into())
    }
}

//! Identity attributes derived from matched rows.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::sql::UserRow;

/// Attribute name to an ordered list of distinct values.
///
/// Names keep the order in which they were first seen, and so do the values
/// under each name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    entries: Vec<(String, Vec<String>)>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `name` unless it is already present.
    ///
    /// Returns `true` if the value was added.
    pub fn insert(&mut self, name: &str, value: String) -> bool {
        let existing = self.entries.iter().position(|(n, _)| n == name);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.entries.push((name.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        let values = &mut self.entries[idx].1;
        if values.iter().any(|v| *v == value) {
            return false;
        }
        values.push(value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Attribute names in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, values)| (n.as_str(), values.as_slice()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// Fold result rows into an [`AttributeSet`].
///
/// Rows are visited in result order and columns in column order. Null values
/// are skipped, everything else is stringified, and repeated values under the
/// same name are kept once. A column that is null in every row produces no
/// attribute at all.
pub fn aggregate<'a, I>(rows: I) -> AttributeSet
where
    I: IntoIterator<Item = &'a UserRow>,
{
    let mut attributes = AttributeSet::new();
    for row in rows {
        for (name, value) in row.iter() {
            if let Some(text) = value.to_text() {
                attributes.insert(name, text);
            }
        }
    }
    attributes
}

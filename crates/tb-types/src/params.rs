use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{deep_eq, ParamValue};

/// Name of the parameter a worker injects with the seconds left in its
/// time budget.
pub const TIME_LEFT_PARAM: &str = "time_left";

/// The parameter dictionary of one task, in grid name order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskParams {
    entries: Vec<(String, ParamValue)>,
}

impl TaskParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_f64)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dictionary equality: same key set, deep-equal values, order ignored.
impl PartialEq for TaskParams {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name).is_some_and(|v| deep_eq(value, v)))
    }
}

impl fmt::Display for TaskParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl<N: Into<String>, V: Into<ParamValue>> FromIterator<(N, V)> for TaskParams {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut params = TaskParams::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_existing_name() {
        let mut params = TaskParams::new().with("a", 1).with("b", 2);
        params.insert("a", 10);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get_i64("a"), Some(10));
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn equality_ignores_order() {
        let ab = TaskParams::new().with("a", 1).with("b", "x");
        let ba = TaskParams::new().with("b", "x").with("a", 1);
        let other = TaskParams::new().with("a", 1).with("b", "y");
        assert_eq!(ab, ba);
        assert_ne!(ab, other);
        assert_ne!(ab, TaskParams::new().with("a", 1));
    }

    #[test]
    fn display_lists_entries_in_order() {
        let params: TaskParams = vec![("a", 0), ("b", 2)].into_iter().collect();
        assert_eq!(params.to_string(), "{a: 0, b: 2}");
    }

    #[test]
    fn numeric_accessors() {
        let params = TaskParams::new().with(TIME_LEFT_PARAM, 1.5).with("n", 3);
        assert_eq!(params.get_f64(TIME_LEFT_PARAM), Some(1.5));
        assert_eq!(params.get_f64("n"), Some(3.0));
        assert_eq!(params.get_i64(TIME_LEFT_PARAM), None);
        assert!(!params.contains("missing"));
    }
}

//! # Parameter Map
//!
//! A small typed map of named values carried in every kernel dispatch and
//! persisted in the checkpoint manifest. Workloads use it for loop state
//! ("iteration") and tuning knobs ("nodes", "density").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Ordered map of named parameters.
///
/// Ordered so that serialized forms (manifest, wire) are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap {
    values: BTreeMap<String, ParamValue>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&mut self, name: &str, value: i64) {
        self.values.insert(name.to_owned(), ParamValue::Int(value));
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn set_float(&mut self, name: &str, value: f64) {
        self.values
            .insert(name.to_owned(), ParamValue::Float(value));
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn set_text(&mut self, name: &str, value: &str) {
        self.values
            .insert(name.to_owned(), ParamValue::Text(value.to_owned()));
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_type_mismatch() {
        let mut params = ParamMap::new();
        params.set_int("iteration", 4);
        params.set_float("damping", 0.8);
        params.set_text("phase", "rank");

        assert_eq!(params.get_int("iteration"), Some(4));
        assert_eq!(params.get_float("damping"), Some(0.8));
        assert_eq!(params.get_text("phase"), Some("rank"));

        // Wrong accessor type reads as missing rather than panicking.
        assert_eq!(params.get_int("phase"), None);
        assert_eq!(params.get_float("missing"), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut params = ParamMap::new();
        params.set_int("iteration", 1);
        params.set_int("iteration", 2);
        assert_eq!(params.get_int("iteration"), Some(2));
    }
}

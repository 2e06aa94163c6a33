use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
pub use string_cache::DefaultAtom as Atom;

/// Composite key `<id>[<Field>]` used for every per-stimulus value.
pub fn field_key(id: &str, field: &str) -> String {
    format!("{id}[{field}]")
}

/// Values recorded during one trial.
///
/// Keys are interned: the same handful of `<id>[<Field>]` strings are written
/// on every tick and every trial of a block.
#[derive(Debug, Clone, Default)]
pub struct TrialData {
    values: HashMap<Atom, Value>,
    known_columns: HashSet<Atom>,
    newly_added: Vec<Atom>,
}

impl TrialData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a trial with every column the block has seen so far set to
    /// the empty string, so records of one block share one shape.
    pub fn seeded<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut data = Self::new();
        for column in columns {
            let atom = Atom::from(column.as_ref());
            data.values.insert(atom.clone(), Value::String(String::new()));
            data.known_columns.insert(atom);
        }
        data
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let atom = Atom::from(key);
        if self.known_columns.insert(atom.clone()) {
            self.newly_added.push(atom.clone());
        }
        self.values.insert(atom, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&Atom::from(key))
    }

    /// Numeric value of `key`, accepting numeric strings. Empty strings and
    /// absent keys are `None`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        value_as_f64(self.get(key)?)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Whether `key` holds something other than the seeded empty string.
    pub fn is_set(&self, key: &str) -> bool {
        !matches!(self.get(key), None | Some(Value::Null))
            && self.get_str(key).is_none_or(|s| !s.is_empty())
    }

    /// Columns first written during this trial, in write order.
    pub fn newly_added(&self) -> impl Iterator<Item = &str> {
        self.newly_added.iter().map(|a| a.as_ref())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.known_columns.iter().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every value rendered as a string, sorted by key. Strings are kept
    /// verbatim so large numbers survive downstream parsers unchanged.
    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.to_string(), rendered)
            })
            .collect()
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_keys_are_tracked_once() {
        let mut data = TrialData::seeded(["Probe[RT]"]);
        data.set("Probe[RT]", 412.5);
        data.set("Probe[ACC]", 1);
        data.set("Probe[ACC]", 0);
        assert_eq!(data.newly_added().collect::<Vec<_>>(), vec!["Probe[ACC]"]);
        assert_eq!(data.get("Probe[ACC]"), Some(&json!(0)));
    }

    #[test]
    fn seeded_columns_read_as_unset() {
        let data = TrialData::seeded(["Probe[Duration]"]);
        assert_eq!(data.get_str("Probe[Duration]"), Some(""));
        assert!(!data.is_set("Probe[Duration]"));
        assert_eq!(data.get_f64("Probe[Duration]"), None);
    }

    #[test]
    fn numeric_strings_read_as_numbers() {
        let mut data = TrialData::new();
        data.set("Cue[Duration]", "250");
        data.set("Cue[Offset]", "soon");
        assert_eq!(data.get_f64("Cue[Duration]"), Some(250.0));
        assert_eq!(data.get_f64("Cue[Offset]"), None);
    }

    #[test]
    fn output_rendering_stringifies_values() {
        let mut data = TrialData::new();
        data.set("BlockId", "B1");
        data.set("B1[TrialNr]", 3);
        data.set("Probe[RTTime]", 1_700_000_000_123.25);
        let out = data.to_strings();
        assert_eq!(out["BlockId"], "B1");
        assert_eq!(out["B1[TrialNr]"], "3");
        assert_eq!(out["Probe[RTTime]"], "1700000000123.25");
    }

    #[test]
    fn field_key_format() {
        assert_eq!(field_key("Probe", "OnsetTime"), "Probe[OnsetTime]");
    }
}

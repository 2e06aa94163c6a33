use crate::error::StoreError;
use crate::persist::Persistence;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Survey-scoped values: a write-through cache in front of the host's
/// persistence.
#[derive(Debug, Clone, Default)]
pub struct SurveyData<P: Persistence> {
    cache: HashMap<String, Value>,
    backend: P,
}

impl<P: Persistence> SurveyData<P> {
    pub fn new(backend: P) -> Self {
        Self {
            cache: HashMap::new(),
            backend,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        self.backend.set_value(key, &value);
        self.cache.insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache
            .get(key)
            .cloned()
            .or_else(|| self.backend.get_value(key))
    }

    /// String stored under `key`; an absent key reads as the empty string.
    pub fn get_string(&self, key: &str) -> Result<String, StoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(StoreError::NotAString { key: key.to_owned() }),
        }
    }

    /// Appends `columns` to the registry of `block_id` stored under
    /// `registry_key`, keeping first-seen order and skipping duplicates.
    pub fn register_columns<I, S>(
        &mut self,
        registry_key: &str,
        block_id: &str,
        columns: I,
    ) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw = self.get_string(registry_key)?;
        let mut registry: BTreeMap<String, Vec<String>> = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw)?
        };
        let entry = registry.entry(block_id.to_owned()).or_default();
        for column in columns {
            let column = column.as_ref();
            if !entry.iter().any(|c| c == column) {
                entry.push(column.to_owned());
            }
        }
        self.set(registry_key, serde_json::to_string(&registry)?);
        Ok(())
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut P {
        &mut self.backend
    }

    pub fn into_backend(self) -> P {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersistence;
    use serde_json::json;

    #[test]
    fn writes_go_through_to_backend() {
        let mut survey = SurveyData::new(MemoryPersistence::new());
        survey.set("ACC", 1);
        assert_eq!(survey.backend().get_value("ACC"), Some(json!(1)));
        assert_eq!(survey.get("ACC"), Some(json!(1)));
    }

    #[test]
    fn reads_fall_back_to_backend() {
        let mut backend = MemoryPersistence::new();
        backend.set_value("seed", &json!("x"));
        let survey = SurveyData::new(backend);
        assert_eq!(survey.get_string("seed").unwrap(), "x");
        assert_eq!(survey.get_string("missing").unwrap(), "");
    }

    #[test]
    fn column_registry_accumulates_per_block() {
        let mut survey = SurveyData::new(MemoryPersistence::new());
        survey
            .register_columns("cols", "B1", ["Probe[RT]", "Probe[ACC]"])
            .unwrap();
        survey
            .register_columns("cols", "B1", ["Probe[RT]", "Cue[OnsetTime]"])
            .unwrap();
        let raw = survey.get_string("cols").unwrap();
        let registry: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            registry["B1"],
            vec!["Probe[RT]", "Probe[ACC]", "Cue[OnsetTime]"]
        );
    }

    #[test]
    fn non_string_value_is_reported() {
        let mut survey = SurveyData::new(MemoryPersistence::new());
        survey.set("n", 3);
        assert!(matches!(
            survey.get_string("n"),
            Err(StoreError::NotAString { .. })
        ));
    }
}

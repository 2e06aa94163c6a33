use serde_json::Value;
use std::collections::HashMap;

/// Durable key-value storage owned by the host (embedded survey fields, a
/// file, a database). The engine never assumes anything about durability.
pub trait Persistence {
    fn set_value(&mut self, key: &str, value: &Value);
    fn get_value(&self, key: &str) -> Option<Value>;
}

/// In-process persistence for demos and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    values: HashMap<String, Value>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn set_value(&mut self, key: &str, value: &Value) {
        self.values.insert(key.to_owned(), value.clone());
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

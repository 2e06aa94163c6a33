use crate::error::StoreError;
use crate::trial::value_as_f64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// State carried from one trial of a block to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockData {
    pub current_block: String,
    /// 1-based number of the trial being run.
    pub block_counter: u32,
    pub trial_columns: BTreeSet<String>,
    pub refresh_period: Option<f64>,
    pub inter_trial_delay: Option<f64>,
    pub previous_end_time: Option<f64>,
    pub previous_storage_done: Option<f64>,
    pub server_comm_onset: Option<f64>,
    pub server_comm_offset: Option<f64>,
    /// Free-form block values, including configuration persisted by
    /// `<configId>[<Field>]` key.
    pub values: BTreeMap<String, Value>,
}

impl BlockData {
    pub fn new(block_id: &str) -> Self {
        Self {
            current_block: block_id.to_owned(),
            block_counter: 1,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores the block document for `block_id`, starting a fresh one when
    /// the persisted document belongs to another block.
    pub fn load_for(json: &str, block_id: &str) -> Result<Self, StoreError> {
        let data = Self::from_json(json)?;
        if data.current_block != block_id {
            tracing::info!(
                block = block_id,
                previous = %data.current_block,
                "starting new block"
            );
            return Ok(Self::new(block_id));
        }
        Ok(data)
    }

    pub fn is_first_trial(&self) -> bool {
        self.previous_end_time.is_none()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        value_as_f64(self.get(key)?)
    }

    pub fn register_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.trial_columns
            .extend(columns.into_iter().map(|c| c.as_ref().to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_loads_as_new_block() {
        let data = BlockData::load_for("", "B1").unwrap();
        assert_eq!(data.current_block, "B1");
        assert_eq!(data.block_counter, 1);
        assert!(data.is_first_trial());
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut data = BlockData::new("B1");
        data.block_counter = 4;
        data.refresh_period = Some(16.68);
        data.previous_end_time = Some(1.0e12);
        data.register_columns(["Probe[RT]", "Probe[ACC]"]);
        data.set("Probe[Duration]", 500);

        let json = data.to_json().unwrap();
        let back = BlockData::load_for(&json, "B1").unwrap();
        assert_eq!(back, data);
        assert!(!back.is_first_trial());
        assert_eq!(back.get_f64("Probe[Duration]"), Some(500.0));
    }

    #[test]
    fn other_block_resets_the_document() {
        let mut data = BlockData::new("B1");
        data.block_counter = 9;
        let json = data.to_json().unwrap();
        let next = BlockData::load_for(&json, "B2").unwrap();
        assert_eq!(next, BlockData::new("B2"));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(matches!(
            BlockData::from_json("{not json"),
            Err(StoreError::Json(_))
        ));
    }
}

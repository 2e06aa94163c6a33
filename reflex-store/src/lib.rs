//! Trial-, block- and survey-scoped key-value data.
//!
//! Trial data is the working set of one trial and ends up in its output
//! record. Block data survives from trial to trial as a JSON document.
//! Survey data sits in front of the host's [`Persistence`] collaborator.

pub mod block;
pub mod error;
pub mod persist;
pub mod survey;
pub mod trial;

pub use block::BlockData;
pub use error::StoreError;
pub use persist::{MemoryPersistence, Persistence};
pub use serde_json::Value;
pub use survey::SurveyData;
pub use trial::{Atom, TrialData, field_key, value_as_f64};

/// Survey key the block document is persisted under.
pub const BLOCK_DATA_FIELD: &str = "reflex_blockData";
/// Survey key of the per-block column registry.
pub const COLUMNS_FIELD: &str = "reflex_columns";

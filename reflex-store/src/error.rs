use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON string under {key:?}")]
    NotAString { key: String },
}

use crate::response::ResponseSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What happens to a stimulus when an allowable response arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndAction {
    /// Keep the stimulus up for its full duration.
    #[default]
    None,
    /// Hide the stimulus on the next tick.
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown end action {0:?}, expected NONE or TERMINATE")]
pub struct ParseEndActionError(pub String);

impl FromStr for EndAction {
    type Err = ParseEndActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(EndAction::None),
            "TERMINATE" => Ok(EndAction::Terminate),
            _ => Err(ParseEndActionError(s.to_owned())),
        }
    }
}

impl fmt::Display for EndAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndAction::None => "NONE",
            EndAction::Terminate => "TERMINATE",
        })
    }
}

/// Resolved presentation and response parameters of one stimulus.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialConfig {
    /// Milliseconds on screen; `f64::INFINITY` when unbounded.
    pub duration: f64,
    pub allowable: ResponseSet,
    pub correct: ResponseSet,
    /// Milliseconds between activation and first show.
    pub delay: f64,
    pub end_action: EndAction,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            duration: f64::INFINITY,
            allowable: ResponseSet::default(),
            correct: ResponseSet::default(),
            delay: 0.0,
            end_action: EndAction::None,
        }
    }
}

impl TrialConfig {
    /// A stimulus only arms response capture when it has something to
    /// classify against.
    pub fn wants_capture(&self) -> bool {
        !self.allowable.is_empty() || !self.correct.is_empty()
    }

    pub fn is_allowable(&self, symbol: char) -> bool {
        self.allowable.contains(symbol)
    }

    pub fn is_correct(&self, symbol: char) -> bool {
        self.correct.contains(symbol)
    }

    pub fn qualifies(&self, symbol: char) -> bool {
        self.is_allowable(symbol) || self.is_correct(symbol)
    }
}

/// One finished trial as handed to the page host: every trial field
/// stringified, plus the columns this trial introduced to its block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub block_id: String,
    pub trial_nr: u32,
    pub fields: BTreeMap<String, String>,
    pub new_columns: Vec<String>,
}

impl TrialRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

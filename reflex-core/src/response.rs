use serde::{Deserialize, Serialize};

/// Wildcard accepted for allowable and correct response sets.
pub const ANY_MARKER: &str = "{ANY}";

/// What [`ANY_MARKER`] expands to: printable letters, digits and the
/// punctuation keys of a US layout.
pub const ANY_SYMBOLS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz1234567890-=[]\\;',./`";

/// A set of response symbols, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResponseSet {
    symbols: String,
}

impl ResponseSet {
    pub fn new(symbols: &str) -> Self {
        if symbols == ANY_MARKER {
            return Self::any();
        }
        Self {
            symbols: symbols.to_owned(),
        }
    }

    pub fn any() -> Self {
        Self {
            symbols: ANY_SYMBOLS.to_owned(),
        }
    }

    pub fn contains(&self, symbol: char) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.symbols
    }
}

impl From<&str> for ResponseSet {
    fn from(symbols: &str) -> Self {
        Self::new(symbols)
    }
}

impl From<String> for ResponseSet {
    fn from(symbols: String) -> Self {
        Self::new(&symbols)
    }
}

impl From<ResponseSet> for String {
    fn from(set: ResponseSet) -> Self {
        set.symbols
    }
}

/// Reaction-time measurement of one activated stimulus.
///
/// Latched by the first qualifying input and never overwritten afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub rt_time: Option<f64>,
    /// `rt_time - display_onset_time`; absent when the input arrived before
    /// the stimulus was on screen.
    pub rt: Option<f64>,
    pub resp: Option<char>,
    pub accuracy: u8,
}

impl ResponseRecord {
    pub fn is_latched(&self) -> bool {
        self.rt_time.is_some()
    }
}

use rand::Rng;
use reflex_core::{EndAction, ResponseSet, TrialConfig};
use reflex_store::{BlockData, TrialData, Value, field_key, value_as_f64};
use reflex_timing::{
    Clock, DEFAULT_REFRESH_PERIOD_MS, FALLBACK_FRAME_INTERVAL_MS, IntervalFrames,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Engine-wide settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period assumed until a calibration window has measured the display.
    pub default_refresh_period_ms: f64,
    /// Length of the calibration window on the first trial of a block when no
    /// inter-trial delay is configured.
    pub calibration_window_ms: f64,
    /// Pacing of [`IntervalFrames`] for hosts without a frame callback.
    pub fallback_frame_interval_ms: f64,
    /// Written to every trial record as `Engine[Version]`.
    pub version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_refresh_period_ms: DEFAULT_REFRESH_PERIOD_MS,
            calibration_window_ms: 1000.0,
            fallback_frame_interval_ms: FALLBACK_FRAME_INTERVAL_MS,
            version: concat!("reflex-engine ", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn interval_frames<C: Clock>(&self, clock: C) -> IntervalFrames<C> {
        IntervalFrames::with_interval(clock, self.fallback_frame_interval_ms)
    }
}

/// A millisecond value given directly or as a set to draw one value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Millis {
    Fixed(f64),
    OneOf(Vec<f64>),
}

impl Millis {
    /// Collapses a set to one uniformly drawn member. Drawing happens once:
    /// later calls return the same value.
    pub fn sample<R: Rng>(&mut self, rng: &mut R) -> Option<f64> {
        match self {
            Millis::Fixed(v) => Some(*v),
            Millis::OneOf(choices) if choices.is_empty() => None,
            Millis::OneOf(choices) => {
                let v = choices[rng.random_range(0..choices.len())];
                *self = Millis::Fixed(v);
                Some(v)
            }
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Millis::Fixed(v) => Some(*v),
            Millis::OneOf(_) => None,
        }
    }
}

impl From<f64> for Millis {
    fn from(v: f64) -> Self {
        Millis::Fixed(v)
    }
}

impl From<Vec<f64>> for Millis {
    fn from(v: Vec<f64>) -> Self {
        Millis::OneOf(v)
    }
}

impl From<&[f64]> for Millis {
    fn from(v: &[f64]) -> Self {
        Millis::OneOf(v.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    Duration,
    Allowable,
    CorrectResponse,
    Delay,
    EndAction,
}

impl ConfigOption {
    pub const ALL: [ConfigOption; 5] = [
        ConfigOption::Duration,
        ConfigOption::Allowable,
        ConfigOption::CorrectResponse,
        ConfigOption::Delay,
        ConfigOption::EndAction,
    ];

    /// Field name used in `<configId>[<Field>]` keys.
    pub fn field(&self) -> &'static str {
        match self {
            ConfigOption::Duration => "Duration",
            ConfigOption::Allowable => "Allowable",
            ConfigOption::CorrectResponse => "CRESP",
            ConfigOption::Delay => "Offset",
            ConfigOption::EndAction => "EndAction",
        }
    }

    fn is_millis(&self) -> bool {
        matches!(self, ConfigOption::Duration | ConfigOption::Delay)
    }
}

impl FromStr for ConfigOption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duration" => Ok(ConfigOption::Duration),
            "allowable" => Ok(ConfigOption::Allowable),
            "cresp" => Ok(ConfigOption::CorrectResponse),
            "delay" => Ok(ConfigOption::Delay),
            "endaction" => Ok(ConfigOption::EndAction),
            _ => Err(ConfigError::UnknownOption(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown configuration option {0:?}")]
    UnknownOption(String),
    #[error("{option} of {config_id:?} expects {expected}, got {value}")]
    Mistyped {
        config_id: String,
        option: &'static str,
        expected: &'static str,
        value: Value,
    },
    #[error("{option} of {config_id:?} was given an empty set to draw from")]
    EmptyChoice {
        config_id: String,
        option: &'static str,
    },
}

/// Per-stimulus values that win over anything persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub duration: Option<Millis>,
    pub allowable: Option<ResponseSet>,
    pub correct: Option<ResponseSet>,
    pub delay: Option<Millis>,
    pub end_action: Option<EndAction>,
}

impl ConfigOverrides {
    /// Draws every set-valued override once.
    pub fn sample<R: Rng>(&mut self, rng: &mut R) {
        for millis in [self.duration.as_mut(), self.delay.as_mut()].into_iter().flatten() {
            millis.sample(rng);
        }
    }
}

/// Resolves the effective [`TrialConfig`] of a stimulus.
///
/// Precedence per field: override, then the value persisted in trial data,
/// then the value persisted in block data, then the built-in default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigResolver;

impl ConfigResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn key(config_id: &str, option: ConfigOption) -> String {
        field_key(config_id, option.field())
    }

    /// Persists one option for `config_id` into both trial and block data and
    /// returns the stored value. A rejected value clears the option.
    ///
    /// Millisecond options accept a number, a numeric string or an array, from
    /// which one member is drawn now. Response sets are stored verbatim,
    /// `{ANY}` included. End actions are stored in canonical form.
    pub fn set_config<R: Rng>(
        &self,
        rng: &mut R,
        trial: &mut TrialData,
        block: &mut BlockData,
        config_id: &str,
        option: &str,
        value: Value,
    ) -> Result<Value, ConfigError> {
        let option: ConfigOption = option.parse()?;
        let key = Self::key(config_id, option);
        let stored = match Self::normalize(rng, config_id, option, value) {
            Ok(stored) => stored,
            Err(err) => {
                // Clear any earlier value so resolution falls back to the default.
                trial.set(&key, "");
                block.set(&key, "");
                return Err(err);
            }
        };
        trial.set(&key, stored.clone());
        block.set(&key, stored.clone());
        tracing::debug!(key, value = %stored, "configuration set");
        Ok(stored)
    }

    fn normalize<R: Rng>(
        rng: &mut R,
        config_id: &str,
        option: ConfigOption,
        value: Value,
    ) -> Result<Value, ConfigError> {
        let mistyped = |expected, value: Value| ConfigError::Mistyped {
            config_id: config_id.to_owned(),
            option: option.field(),
            expected,
            value,
        };
        if option.is_millis() {
            let value = match value {
                Value::Array(choices) if choices.is_empty() => {
                    return Err(ConfigError::EmptyChoice {
                        config_id: config_id.to_owned(),
                        option: option.field(),
                    });
                }
                Value::Array(mut choices) => {
                    let idx = rng.random_range(0..choices.len());
                    choices.swap_remove(idx)
                }
                other => other,
            };
            return match value_as_f64(&value) {
                Some(ms) if ms.is_finite() => Ok(Value::from(ms)),
                _ => Err(mistyped("milliseconds", value)),
            };
        }
        match (option, value) {
            (ConfigOption::EndAction, Value::String(s)) => match s.parse::<EndAction>() {
                Ok(action) => Ok(Value::String(action.to_string())),
                Err(_) => Err(mistyped("NONE or TERMINATE", Value::String(s))),
            },
            (ConfigOption::EndAction, other) => Err(mistyped("NONE or TERMINATE", other)),
            (_, Value::String(s)) => Ok(Value::String(s)),
            (_, other) => Err(mistyped("a string of symbols", other)),
        }
    }

    /// Effective configuration of `config_id`. With `persisted` set to
    /// `None` only the overrides and defaults take part.
    pub fn resolve(
        &self,
        config_id: &str,
        overrides: &ConfigOverrides,
        persisted: Option<(&TrialData, &BlockData)>,
    ) -> TrialConfig {
        let defaults = TrialConfig::default();
        let stored = |option: ConfigOption| -> Option<Value> {
            let (trial, block) = persisted?;
            let key = Self::key(config_id, option);
            if trial.is_set(&key) {
                return trial.get(&key).cloned();
            }
            block
                .get(&key)
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .cloned()
        };
        let millis = |option: ConfigOption, over: &Option<Millis>, default: f64| -> f64 {
            if let Some(v) = over.as_ref().and_then(Millis::value) {
                return v;
            }
            match stored(option) {
                None => default,
                Some(value) => match value_as_f64(&value) {
                    Some(v) if !v.is_nan() => v,
                    _ => {
                        tracing::warn!(config_id, option = option.field(), %value, "ignoring non-numeric configuration");
                        default
                    }
                },
            }
        };
        let symbols = |option: ConfigOption, over: &Option<ResponseSet>| -> ResponseSet {
            if let Some(set) = over {
                return set.clone();
            }
            match stored(option) {
                None => ResponseSet::default(),
                Some(Value::String(s)) => ResponseSet::new(&s),
                Some(value) => {
                    tracing::warn!(config_id, option = option.field(), %value, "ignoring non-string configuration");
                    ResponseSet::default()
                }
            }
        };
        let end_action = overrides.end_action.unwrap_or_else(|| {
            match stored(ConfigOption::EndAction) {
                None => defaults.end_action,
                Some(value) => match value.as_str().map(str::parse::<EndAction>) {
                    Some(Ok(action)) => action,
                    _ => {
                        tracing::warn!(config_id, %value, "ignoring unknown end action");
                        defaults.end_action
                    }
                },
            }
        });

        TrialConfig {
            duration: millis(ConfigOption::Duration, &overrides.duration, defaults.duration),
            allowable: symbols(ConfigOption::Allowable, &overrides.allowable),
            correct: symbols(ConfigOption::CorrectResponse, &overrides.correct),
            delay: millis(ConfigOption::Delay, &overrides.delay, defaults.delay),
            end_action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn stores() -> (TrialData, BlockData) {
        (TrialData::new(), BlockData::new("B1"))
    }

    #[test]
    fn option_names_are_case_insensitive() {
        assert_eq!("CRESP".parse::<ConfigOption>(), Ok(ConfigOption::CorrectResponse));
        assert_eq!("Delay".parse::<ConfigOption>(), Ok(ConfigOption::Delay));
        assert_eq!("endAction".parse::<ConfigOption>(), Ok(ConfigOption::EndAction));
        assert!(matches!(
            "colour".parse::<ConfigOption>(),
            Err(ConfigError::UnknownOption(_))
        ));
        assert_eq!(ConfigOption::Delay.field(), "Offset");
    }

    #[test]
    fn override_beats_persisted_value() {
        let mut rng = StdRng::seed_from_u64(1);
        let (mut trial, mut block) = stores();
        ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "probe", "duration", json!(500))
            .unwrap();
        let overrides = ConfigOverrides {
            duration: Some(Millis::Fixed(300.0)),
            ..Default::default()
        };
        let cfg = ConfigResolver.resolve("probe", &overrides, Some((&trial, &block)));
        assert_eq!(cfg.duration, 300.0);
        let cfg = ConfigResolver.resolve("probe", &ConfigOverrides::default(), Some((&trial, &block)));
        assert_eq!(cfg.duration, 500.0);
    }

    #[test]
    fn block_value_applies_when_trial_value_is_empty() {
        let (mut trial, mut block) = stores();
        block.set("probe[Allowable]", "fj");
        trial.set("probe[Allowable]", "");
        let cfg = ConfigResolver.resolve("probe", &ConfigOverrides::default(), Some((&trial, &block)));
        assert!(cfg.is_allowable('f'));
        assert!(!cfg.is_allowable('x'));
    }

    #[test]
    fn persisted_values_are_skipped_without_load() {
        let (mut trial, mut block) = stores();
        block.set("probe[Duration]", 700);
        trial.set("probe[EndAction]", "TERMINATE");
        let cfg = ConfigResolver.resolve("probe", &ConfigOverrides::default(), None);
        assert!(cfg.duration.is_infinite());
        assert_eq!(cfg.end_action, EndAction::None);
    }

    #[test]
    fn any_marker_expands_when_resolved() {
        let mut rng = StdRng::seed_from_u64(1);
        let (mut trial, mut block) = stores();
        let stored = ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "probe", "allowable", json!("{ANY}"))
            .unwrap();
        assert_eq!(stored, json!("{ANY}"));
        let cfg = ConfigResolver.resolve("probe", &ConfigOverrides::default(), Some((&trial, &block)));
        assert!(cfg.is_allowable('q'));
        assert!(cfg.is_allowable('7'));
        assert!(cfg.is_allowable('/'));
    }

    #[test]
    fn discrete_sets_are_drawn_once_at_set_time() {
        let mut rng = StdRng::seed_from_u64(42);
        let (mut trial, mut block) = stores();
        let stored = ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "fix", "duration", json!([250, 500, 750]))
            .unwrap();
        let ms = stored.as_f64().unwrap();
        assert!([250.0, 500.0, 750.0].contains(&ms));
        assert_eq!(block.get_f64("fix[Duration]"), Some(ms));
        for _ in 0..5 {
            let cfg = ConfigResolver.resolve("fix", &ConfigOverrides::default(), Some((&trial, &block)));
            assert_eq!(cfg.duration, ms);
        }
    }

    #[test]
    fn mistyped_values_are_rejected_or_defaulted() {
        let mut rng = StdRng::seed_from_u64(1);
        let (mut trial, mut block) = stores();
        let err = ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "p", "duration", json!("soon"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Mistyped { option: "Duration", .. }));
        let err = ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "p", "delay", json!([]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyChoice { .. }));

        trial.set("p[Duration]", "soon");
        trial.set("p[CRESP]", 4);
        let cfg = ConfigResolver.resolve("p", &ConfigOverrides::default(), Some((&trial, &block)));
        assert!(cfg.duration.is_infinite());
        assert!(cfg.correct.is_empty());
    }

    #[test]
    fn rejected_value_clears_earlier_setting() {
        let mut rng = StdRng::seed_from_u64(1);
        let (mut trial, mut block) = stores();
        ConfigResolver
            .set_config(&mut rng, &mut trial, &mut block, "p", "duration", json!(500))
            .unwrap();
        let result =
            ConfigResolver.set_config(&mut rng, &mut trial, &mut block, "p", "duration", json!("soon"));
        assert!(result.is_err());
        let cfg = ConfigResolver.resolve("p", &ConfigOverrides::default(), Some((&trial, &block)));
        assert!(cfg.duration.is_infinite());

        // The next trial starts from the block document alone.
        let cfg = ConfigResolver.resolve(
            "p",
            &ConfigOverrides::default(),
            Some((&TrialData::new(), &block)),
        );
        assert!(cfg.duration.is_infinite());
    }

    #[test]
    fn millis_sample_collapses_set() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut m = Millis::from(vec![10.0, 20.0]);
        assert_eq!(m.value(), None);
        let first = m.sample(&mut rng).unwrap();
        assert_eq!(m, Millis::Fixed(first));
        assert_eq!(m.sample(&mut rng), Some(first));
        assert_eq!(Millis::OneOf(vec![]).sample(&mut rng), None);
    }

    #[test]
    fn engine_config_fills_missing_fields() {
        let cfg = EngineConfig::from_json(r#"{"calibration_window_ms": 250}"#).unwrap();
        assert_eq!(cfg.calibration_window_ms, 250.0);
        assert_eq!(cfg.default_refresh_period_ms, DEFAULT_REFRESH_PERIOD_MS);
    }
}

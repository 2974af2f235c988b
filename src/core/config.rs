//! Session configuration from environment variables.
//!
//! Load configuration using `SessionConfig::from_env()` after calling `dotenvy::dotenv()`.
//! Unset variables take their default; malformed ones are logged and ignored.

use std::str::FromStr;

use crate::core::model::{DeletePolicy, ModelRules};
use crate::core::positions::Viewport;
use crate::core::validation::ValidationLevel;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_PLACEMENT_JITTER: f64 = 120.0;
const DEFAULT_PLACEMENT_SEED: u64 = 42;

/// Designer session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Maximum number of undo entries kept; `None` keeps everything
    pub history_limit: Option<usize>,

    /// Visible canvas area used for default table placement
    pub viewport: Viewport,

    /// Maximum distance from the viewport center for a new table
    pub placement_jitter: f64,

    /// Seed for placement jitter, fixed so layouts are reproducible
    pub placement_seed: u64,

    pub delete_policy: DeletePolicy,
    pub allow_relation_cycles: bool,
    pub validation_level: ValidationLevel,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let history_limit = match parse_var::<usize>(&lookup, "DESIGNER_HISTORY_LIMIT") {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => defaults.history_limit,
        };

        let viewport = Viewport::new(
            parse_finite(&lookup, "DESIGNER_VIEWPORT_WIDTH", |w| w > 0.0)
                .unwrap_or(defaults.viewport.width),
            parse_finite(&lookup, "DESIGNER_VIEWPORT_HEIGHT", |h| h > 0.0)
                .unwrap_or(defaults.viewport.height),
        );

        Self {
            history_limit,
            viewport,
            placement_jitter: parse_finite(&lookup, "DESIGNER_PLACEMENT_JITTER", |j| j >= 0.0)
                .unwrap_or(defaults.placement_jitter),
            placement_seed: parse_var(&lookup, "DESIGNER_PLACEMENT_SEED")
                .unwrap_or(defaults.placement_seed),
            delete_policy: parse_var(&lookup, "DESIGNER_DELETE_POLICY")
                .unwrap_or(defaults.delete_policy),
            allow_relation_cycles: parse_var(&lookup, "DESIGNER_ALLOW_RELATION_CYCLES")
                .unwrap_or(defaults.allow_relation_cycles),
            validation_level: parse_var(&lookup, "DESIGNER_VALIDATION_LEVEL")
                .unwrap_or(defaults.validation_level),
        }
    }

    /// Rules handed to the entity model
    pub fn model_rules(&self) -> ModelRules {
        ModelRules {
            validation_level: self.validation_level,
            delete_policy: self.delete_policy,
            allow_relation_cycles: self.allow_relation_cycles,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
            viewport: Viewport::default(),
            placement_jitter: DEFAULT_PLACEMENT_JITTER,
            placement_seed: DEFAULT_PLACEMENT_SEED,
            delete_policy: DeletePolicy::default(),
            allow_relation_cycles: false,
            validation_level: ValidationLevel::default(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}='{}': {}", key, raw, e);
            None
        }
    }
}

/// Finite numbers within the accepted range only
fn parse_finite(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    accept: impl Fn(f64) -> bool,
) -> Option<f64> {
    let value = parse_var::<f64>(lookup, key)?;
    if value.is_finite() && accept(value) {
        Some(value)
    } else {
        tracing::warn!("Ignoring out-of-range {}={}", key, value);
        None
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Installment anchors are capped at the 28th so that every month has the anchor
// day. Anything higher would drift whenever a short month comes along.
pub const MAX_ANCHOR_DAY: u32 = 28;

/// How the linked-payment path moves a plan's next due date forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueDateRule {
    /// One calendar month, with the day pinned to the plan's anchor and clamped to
    /// the month length. This is what single installment payments always use.
    CalendarMonth,
    /// Thirty days after the current due date. Kept for stores populated by the
    /// older linking behaviour.
    ThirtyDays,
}

impl Default for DueDateRule {
    fn default() -> Self {
        DueDateRule::CalendarMonth
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_max_anchor_day")]
    pub max_anchor_day: u32,
    #[serde(default)]
    pub link_due_rule: DueDateRule,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not parse engine configuration")]
    Parse(#[from] serde_json::Error),
    #[error("max_anchor_day must be between 1 and 28, got {0}")]
    AnchorDay(u32),
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_anchor_day: Self::default_max_anchor_day(),
            link_due_rule: DueDateRule::default(),
        }
    }
}

impl EngineConfig {
    fn default_max_anchor_day() -> u32 {
        MAX_ANCHOR_DAY
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;

        if config.max_anchor_day == 0 || config.max_anchor_day > MAX_ANCHOR_DAY {
            return Err(ConfigError::AnchorDay(config.max_anchor_day));
        }

        Ok(config)
    }
}

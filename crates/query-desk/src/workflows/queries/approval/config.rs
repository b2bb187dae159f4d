use serde::{Deserialize, Serialize};

pub const DEFAULT_HIGH_PRIORITY_AMOUNT: u64 = 5_000_000;
pub const DEFAULT_MEDIUM_PRIORITY_AMOUNT: u64 = 1_000_000;
pub const DEFAULT_URGENCY_KEYWORDS: [&str; 5] =
    ["urgent", "emergency", "immediate", "asap", "critical"];

/// Thresholds and keywords feeding the approval-request priority rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub high_amount_threshold: u64,
    pub medium_amount_threshold: u64,
    pub urgency_keywords: Vec<String>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            high_amount_threshold: DEFAULT_HIGH_PRIORITY_AMOUNT,
            medium_amount_threshold: DEFAULT_MEDIUM_PRIORITY_AMOUNT,
            urgency_keywords: DEFAULT_URGENCY_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
        }
    }
}

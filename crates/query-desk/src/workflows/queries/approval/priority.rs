use std::fmt;

use serde::{Deserialize, Serialize};

use super::super::domain::ActionKind;
use super::config::PriorityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered rule set, first match wins: OTC, loan amount bands, urgency keywords, type fallback.
pub(crate) fn assess_priority(
    request_type: ActionKind,
    loan_amount: Option<u64>,
    query_text: &str,
    config: &PriorityConfig,
) -> Priority {
    if request_type == ActionKind::Otc {
        return Priority::High;
    }

    if let Some(amount) = loan_amount {
        if amount > config.high_amount_threshold {
            return Priority::High;
        }
        if amount > config.medium_amount_threshold {
            return Priority::Medium;
        }
    }

    let text = query_text.to_lowercase();
    if config
        .urgency_keywords
        .iter()
        .any(|keyword| !keyword.is_empty() && text.contains(&keyword.to_lowercase()))
    {
        return Priority::Urgent;
    }

    match request_type {
        ActionKind::Approve => Priority::Medium,
        ActionKind::Deferral => Priority::Low,
        ActionKind::Otc => Priority::Medium,
    }
}

use serde::{Deserialize, Serialize};

/// Subscription tier stored on the user row. Drives the daily quota policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    /// Unknown or missing tiers fall back to the free plan.
    pub fn from_tier(tier: Option<&str>) -> Self {
        match tier.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("premium") | Some("pro") => Plan::Premium,
            _ => Plan::Free,
        }
    }
}

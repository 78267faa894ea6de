use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Billing/reporting tier of an underlying model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Premium,
    Standard,
    Economy,
}

impl ModelTier {
    /// Classify a model identifier into a tier.
    ///
    /// Total over all inputs: unknown identifiers fall back to `Standard`
    /// with a logged warning rather than failing.
    pub fn classify(model_id: &str) -> ModelTier {
        let id = model_id.to_ascii_lowercase();
        if id.contains("opus") {
            ModelTier::Premium
        } else if id.contains("sonnet") {
            ModelTier::Standard
        } else if id.contains("haiku") {
            ModelTier::Economy
        } else {
            warn!(model = %model_id, "Unknown model id, classifying as standard tier");
            ModelTier::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Premium => "premium",
            ModelTier::Standard => "standard",
            ModelTier::Economy => "economy",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "premium" => Ok(ModelTier::Premium),
            "standard" => Ok(ModelTier::Standard),
            "economy" => Ok(ModelTier::Economy),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

/// Per-tier base rates in USD per million tokens.
///
/// Cache-write and cache-read rates are derived, not configured:
/// cache writes bill at 1.25x the input rate, cache reads at 0.10x.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierRates {
    pub input_per_mtok: Decimal,
    pub output_per_mtok: Decimal,
}

impl TierRates {
    pub fn new(input_per_mtok: Decimal, output_per_mtok: Decimal) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }
}

/// The full rate table, one entry per tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateTable {
    pub premium: TierRates,
    pub standard: TierRates,
    pub economy: TierRates,
}

impl RateTable {
    pub fn for_tier(&self, tier: ModelTier) -> &TierRates {
        match tier {
            ModelTier::Premium => &self.premium,
            ModelTier::Standard => &self.standard,
            ModelTier::Economy => &self.economy,
        }
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            premium: TierRates::new(Decimal::new(5, 0), Decimal::new(25, 0)),
            standard: TierRates::new(Decimal::new(3, 0), Decimal::new(15, 0)),
            economy: TierRates::new(Decimal::new(80, 2), Decimal::new(4, 0)),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::tier::ModelTier;

/// The closed set of agent roles in a research run.
///
/// Roles execute in `EXECUTION_ORDER`. The data engineer is the market-data
/// pipeline rather than a model call; every other role maps to exactly one
/// model-API call per run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Fetches, validates, and caches market data (no model call).
    DataEngineer,
    /// Business model and competitive-position analysis.
    BusinessAnalyst,
    /// Recent news, catalysts, and price-movement context.
    FinanceResearcher,
    /// Price action and indicator readout.
    TechnicalAnalyst,
    /// Cross-checks specialist outputs against the cached data.
    QaReviewer,
    /// Merges all specialist outputs into the final report body.
    ReportAssembler,
    /// Produces the conviction score and signal.
    FundamentalAnalyst,
}

/// The fixed dependency order the orchestrator walks. Analytical roles are
/// conceptually independent but still run sequentially: they share one
/// budget and one rate-limited caller.
pub const EXECUTION_ORDER: [AgentRole; 7] = [
    AgentRole::DataEngineer,
    AgentRole::BusinessAnalyst,
    AgentRole::FinanceResearcher,
    AgentRole::TechnicalAnalyst,
    AgentRole::QaReviewer,
    AgentRole::ReportAssembler,
    AgentRole::FundamentalAnalyst,
];

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::DataEngineer => "data_engineer",
            AgentRole::BusinessAnalyst => "business_analyst",
            AgentRole::FinanceResearcher => "finance_researcher",
            AgentRole::TechnicalAnalyst => "technical_analyst",
            AgentRole::QaReviewer => "qa_reviewer",
            AgentRole::ReportAssembler => "report_assembler",
            AgentRole::FundamentalAnalyst => "fundamental_analyst",
        }
    }

    /// A fatal failure in a critical role fails the whole run; non-critical
    /// failures degrade it to partial.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AgentRole::DataEngineer | AgentRole::ReportAssembler | AgentRole::FundamentalAnalyst
        )
    }

    /// Whether this role issues a billable model-API call.
    pub fn is_billable(&self) -> bool {
        !matches!(self, AgentRole::DataEngineer)
    }

    /// Default billing/reporting tier when no model is assigned in config.
    pub fn default_tier(&self) -> ModelTier {
        match self {
            AgentRole::ReportAssembler | AgentRole::FundamentalAnalyst => ModelTier::Premium,
            AgentRole::BusinessAnalyst | AgentRole::FinanceResearcher => ModelTier::Standard,
            AgentRole::DataEngineer | AgentRole::TechnicalAnalyst | AgentRole::QaReviewer => {
                ModelTier::Economy
            }
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EXECUTION_ORDER
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown agent role: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_order_starts_with_data_and_ends_with_scoring() {
        assert_eq!(EXECUTION_ORDER[0], AgentRole::DataEngineer);
        assert_eq!(EXECUTION_ORDER[6], AgentRole::FundamentalAnalyst);
    }

    #[test]
    fn critical_path_roles() {
        let critical: Vec<_> = EXECUTION_ORDER.iter().filter(|r| r.is_critical()).collect();
        assert_eq!(
            critical,
            vec![
                &AgentRole::DataEngineer,
                &AgentRole::ReportAssembler,
                &AgentRole::FundamentalAnalyst
            ]
        );
    }

    #[test]
    fn only_data_engineer_is_unbilled() {
        for role in EXECUTION_ORDER {
            assert_eq!(role.is_billable(), role != AgentRole::DataEngineer);
        }
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentRole::QaReviewer).unwrap(),
            "\"qa_reviewer\""
        );
        let parsed: AgentRole = serde_json::from_str("\"report_assembler\"").unwrap();
        assert_eq!(parsed, AgentRole::ReportAssembler);
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::role::AgentRole;
use crate::tier::RateTable;

/// Top-level configuration for ERSA.
///
/// Loaded from TOML once in the binary and passed by value to every
/// component constructor; no component reads ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErsaConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rates: RateTable,
    #[serde(default)]
    pub models: ModelAssignments,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub model_api: ModelApiConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Environment variable holding the model-API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ErsaConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            budget: BudgetConfig::default(),
            retry: RetryConfig::default(),
            rates: RateTable::default(),
            models: ModelAssignments::default(),
            universe: UniverseConfig::default(),
            refresh: RefreshConfig::default(),
            prompts: PromptsConfig::default(),
            model_api: ModelApiConfig::default(),
            market_data: MarketDataConfig::default(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// How the model API is reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelApiConfig {
    /// External command implementing the model call transport.
    pub command: String,
}

impl Default for ModelApiConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
        }
    }
}

/// Where the local market-data files live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketDataConfig {
    /// Directory holding one subdirectory per symbol.
    pub data_path: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            data_path: "data/market".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding the ledger and market cache.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/ersa.db".to_string(),
        }
    }
}

/// Hard cost limits. Exceeding these stops work before more cost is incurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum cumulative cost for one run in USD.
    pub per_run_ceiling_usd: Decimal,
    /// Maximum total spend per calendar day in USD.
    pub daily_limit_usd: Decimal,
    /// Output token bound passed on every model call.
    pub max_tokens_per_call: u32,
    /// Wall-clock deadline for one run, checked between calls.
    #[serde(default = "default_run_deadline")]
    pub run_deadline_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_run_ceiling_usd: Decimal::new(50, 2),
            daily_limit_usd: Decimal::new(10, 0),
            max_tokens_per_call: 4096,
            run_deadline_secs: default_run_deadline(),
        }
    }
}

/// Retry/backoff policy inputs for the model-API caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter_ratio: f64,
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
            request_timeout_secs: 60,
        }
    }
}

/// Model id assigned to each billable role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelAssignments {
    pub business_analyst: String,
    pub finance_researcher: String,
    pub technical_analyst: String,
    pub qa_reviewer: String,
    pub report_assembler: String,
    pub fundamental_analyst: String,
}

impl ModelAssignments {
    /// The model assigned to a role. The data engineer never calls the
    /// model API.
    pub fn for_role(&self, role: AgentRole) -> Option<&str> {
        match role {
            AgentRole::DataEngineer => None,
            AgentRole::BusinessAnalyst => Some(&self.business_analyst),
            AgentRole::FinanceResearcher => Some(&self.finance_researcher),
            AgentRole::TechnicalAnalyst => Some(&self.technical_analyst),
            AgentRole::QaReviewer => Some(&self.qa_reviewer),
            AgentRole::ReportAssembler => Some(&self.report_assembler),
            AgentRole::FundamentalAnalyst => Some(&self.fundamental_analyst),
        }
    }
}

impl Default for ModelAssignments {
    fn default() -> Self {
        Self {
            business_analyst: "claude-sonnet-4-6".to_string(),
            finance_researcher: "claude-sonnet-4-6".to_string(),
            technical_analyst: "claude-haiku-4-5-20251001".to_string(),
            qa_reviewer: "claude-haiku-4-5-20251001".to_string(),
            report_assembler: "claude-opus-4-6".to_string(),
            fundamental_analyst: "claude-opus-4-6".to_string(),
        }
    }
}

/// Ticker-universe gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseConfig {
    pub market_cap_floor_usd: i64,
    /// Minimum trading days of history (~2 trading years).
    pub min_history_days: u32,
    /// Provider exchange codes accepted by the listing gate.
    pub allowed_exchanges: Vec<String>,
    /// Calendar days of history to fetch on a full pass.
    pub history_window_days: u32,
    /// How long a cached validation verdict stays fresh.
    pub verdict_ttl_secs: u64,
    pub verdict_cache_capacity: u64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            market_cap_floor_usd: 500_000_000,
            min_history_days: 480,
            allowed_exchanges: ["NYQ", "NYSE", "NMS", "NGM", "NCM", "NASDAQ"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            history_window_days: 730,
            verdict_ttl_secs: 86_400,
            verdict_cache_capacity: 10_000,
        }
    }
}

/// Scheduled-refresh daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    pub enabled: bool,
    /// Symbols re-pulled on every cycle.
    #[serde(default)]
    pub symbols: Vec<String>,
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: Vec::new(),
            interval_secs: 3_600,
        }
    }
}

/// Where role prompts live. Prompt content is opaque to this repo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PromptsConfig {
    /// Directory of role-keyed .md prompt files.
    pub dir: String,
}

fn default_api_key_env() -> String {
    "ERSA_API_KEY".to_string()
}

fn default_run_deadline() -> u64 {
    300
}

/// Model-API credential, resolved from the environment.
///
/// Loading never fails: an unset or empty variable yields `Unconfigured`,
/// and callers must handle both variants instead of crashing at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCredential {
    Configured(String),
    Unconfigured,
}

impl ApiCredential {
    pub fn from_env(var: &str) -> ApiCredential {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => ApiCredential::Configured(key),
            _ => ApiCredential::Unconfigured,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, ApiCredential::Configured(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_documented_values() {
        let config = ErsaConfig::default();
        assert_eq!(config.budget.per_run_ceiling_usd, dec!(0.50));
        assert_eq!(config.budget.daily_limit_usd, dec!(10));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.universe.market_cap_floor_usd, 500_000_000);
        assert_eq!(config.universe.min_history_days, 480);
        assert_eq!(config.api_key_env, "ERSA_API_KEY");
    }

    #[test]
    fn deserialize_empty_config_uses_defaults() {
        let config: ErsaConfig = toml::from_str("").unwrap();
        assert_eq!(config.storage.sqlite_path, "data/ersa.db");
        assert!(!config.refresh.enabled);
        assert_eq!(config.universe.allowed_exchanges.len(), 6);
    }

    #[test]
    fn deserialize_partial_override() {
        let toml_str = r#"
[storage]
sqlite_path = "/tmp/test.db"

[budget]
per_run_ceiling_usd = "1.25"
daily_limit_usd = "25.00"
max_tokens_per_call = 8192

[refresh]
enabled = true
symbols = ["AAPL", "MSFT"]
interval_secs = 900
"#;
        let config: ErsaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.sqlite_path, "/tmp/test.db");
        assert_eq!(config.budget.per_run_ceiling_usd, dec!(1.25));
        assert_eq!(config.refresh.symbols, vec!["AAPL", "MSFT"]);
        // Untouched sections keep defaults
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn model_assignment_per_role() {
        let models = ModelAssignments::default();
        assert!(models.for_role(AgentRole::DataEngineer).is_none());
        assert_eq!(
            models.for_role(AgentRole::ReportAssembler),
            Some("claude-opus-4-6")
        );
        assert_eq!(
            models.for_role(AgentRole::QaReviewer),
            Some("claude-haiku-4-5-20251001")
        );
    }

    #[test]
    fn credential_from_env() {
        std::env::set_var("ERSA_TEST_KEY_SET", "sk-test");
        assert_eq!(
            ApiCredential::from_env("ERSA_TEST_KEY_SET"),
            ApiCredential::Configured("sk-test".to_string())
        );
        assert_eq!(
            ApiCredential::from_env("ERSA_TEST_KEY_DEFINITELY_UNSET"),
            ApiCredential::Unconfigured
        );
    }
}

use ersa_models::config::UniverseConfig;
use ersa_models::market::{InstrumentMeta, Rejection};

/// Ordered, short-circuiting validation gates.
///
/// The first failing gate determines the rejection; later gates are never
/// evaluated. Gate order: format, instrument kind, listing exchange,
/// market-cap floor, history length.

/// Gate 1: ASCII letters only, 1-5 characters. Pure; runs before any
/// provider call.
pub fn check_format(symbol: &str) -> Result<(), Rejection> {
    if symbol.is_empty()
        || symbol.len() > 5
        || !symbol.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Err(Rejection::Format {
            symbol: symbol.to_string(),
        });
    }
    Ok(())
}

/// Gates 2-4 against provider instrument metadata: equity quote type,
/// allow-listed exchange code, market cap at or above the floor.
pub fn check_instrument(meta: &InstrumentMeta, config: &UniverseConfig) -> Result<(), Rejection> {
    let quote_type = meta.quote_type.to_ascii_uppercase();
    if quote_type != "EQUITY" {
        return Err(Rejection::QuoteType {
            quote_type: meta.quote_type.clone(),
        });
    }

    if !config.allowed_exchanges.iter().any(|e| e == &meta.exchange) {
        return Err(Rejection::Exchange {
            exchange: meta.exchange.clone(),
        });
    }

    match meta.market_cap {
        Some(cap) if cap >= config.market_cap_floor_usd => Ok(()),
        other => Err(Rejection::MarketCap { market_cap: other }),
    }
}

/// Gate 5: minimum trading days of price history.
pub fn check_history(trading_days: usize, config: &UniverseConfig) -> Result<(), Rejection> {
    if (trading_days as u32) < config.min_history_days {
        return Err(Rejection::History {
            days: trading_days as u32,
            required: config.min_history_days,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(quote_type: &str, exchange: &str, market_cap: Option<i64>) -> InstrumentMeta {
        InstrumentMeta {
            symbol: "TEST".to_string(),
            company_name: Some("Test Corp".to_string()),
            quote_type: quote_type.to_string(),
            exchange: exchange.to_string(),
            market_cap,
            sector: None,
            industry: None,
            current_price: None,
            change_usd: None,
            change_pct: None,
            volume: None,
        }
    }

    #[test]
    fn format_gate() {
        assert!(check_format("AAPL").is_ok());
        assert!(check_format("A").is_ok());
        assert!(check_format("GOOGL").is_ok());
        assert!(matches!(
            check_format(""),
            Err(Rejection::Format { .. })
        ));
        assert!(matches!(
            check_format("TOOLONG"),
            Err(Rejection::Format { .. })
        ));
        assert!(matches!(
            check_format("BRK.B"),
            Err(Rejection::Format { .. })
        ));
        assert!(matches!(
            check_format("AB12"),
            Err(Rejection::Format { .. })
        ));
    }

    #[test]
    fn quote_type_gate_rejects_non_equity() {
        let config = UniverseConfig::default();
        let rejection = check_instrument(&meta("ETF", "NYQ", Some(10_000_000_000)), &config)
            .unwrap_err();
        assert_eq!(rejection.kind(), "quote_type");

        // case-insensitive accept
        assert!(check_instrument(&meta("equity", "NYQ", Some(10_000_000_000)), &config).is_ok());
    }

    #[test]
    fn exchange_gate_runs_before_market_cap() {
        let config = UniverseConfig::default();
        // Fails both the exchange gate and the cap floor; the earlier gate wins.
        let rejection =
            check_instrument(&meta("EQUITY", "LSE", Some(100_000_000)), &config).unwrap_err();
        assert_eq!(rejection.kind(), "exchange");
    }

    #[test]
    fn market_cap_gate() {
        let config = UniverseConfig::default();
        let rejection =
            check_instrument(&meta("EQUITY", "NMS", Some(499_999_999)), &config).unwrap_err();
        assert_eq!(rejection.kind(), "market_cap");

        let rejection = check_instrument(&meta("EQUITY", "NMS", None), &config).unwrap_err();
        assert_eq!(rejection.kind(), "market_cap");

        assert!(check_instrument(&meta("EQUITY", "NMS", Some(500_000_000)), &config).is_ok());
    }

    #[test]
    fn history_gate() {
        let config = UniverseConfig::default();
        assert!(check_history(480, &config).is_ok());
        let rejection = check_history(400, &config).unwrap_err();
        assert_eq!(rejection.kind(), "history");
        assert_eq!(
            rejection.to_string(),
            "only 400 trading days of history; 480 required"
        );
    }
}

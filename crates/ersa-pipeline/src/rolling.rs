use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use ersa_models::market::{DailyBar, PriceRecord};

/// Trading days in a 52-week window.
const WINDOW_52W: usize = 252;
const WINDOW_10D: usize = 10;
const WINDOW_30D: usize = 30;

/// Enrich raw bars with the derived trailing-window fields.
///
/// Every derived value is a function of the bar's own trailing window, so a
/// re-upsert of the same window always recomputes identical values; nothing
/// is carried over from previously stored rows. Bars must be oldest-first.
pub fn enrich_bars(symbol: &str, bars: &[DailyBar], pulled_at: DateTime<Utc>) -> Vec<PriceRecord> {
    let mut records = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let mut builder = PriceRecord::builder(symbol, bar.clone())
            .range_52w(
                trailing_max_high(bars, i, WINDOW_52W),
                trailing_min_low(bars, i, WINDOW_52W),
            )
            .avg_volumes(
                trailing_mean_volume(bars, i, WINDOW_10D),
                trailing_mean_volume(bars, i, WINDOW_30D),
            )
            .pulled_at(pulled_at);

        if i > 0 {
            let prev_close = bars[i - 1].close;
            let change = bar.close - prev_close;
            let pct = if prev_close.is_zero() {
                Decimal::ZERO
            } else {
                (change / prev_close).round_dp(6)
            };
            builder = builder.daily_change(change, pct);
        }

        records.push(builder.build());
    }

    records
}

fn window_start(i: usize, window: usize) -> usize {
    (i + 1).saturating_sub(window)
}

fn trailing_max_high(bars: &[DailyBar], i: usize, window: usize) -> Decimal {
    bars[window_start(i, window)..=i]
        .iter()
        .map(|b| b.high)
        .max()
        .unwrap_or(bars[i].high)
}

fn trailing_min_low(bars: &[DailyBar], i: usize, window: usize) -> Decimal {
    bars[window_start(i, window)..=i]
        .iter()
        .map(|b| b.low)
        .min()
        .unwrap_or(bars[i].low)
}

fn trailing_mean_volume(bars: &[DailyBar], i: usize, window: usize) -> u64 {
    let slice = &bars[window_start(i, window)..=i];
    let sum: u64 = slice.iter().map(|b| b.volume).sum();
    sum / slice.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn bar(day: u32, close: Decimal, volume: u64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Days::new(day as u64),
            open: close - dec!(1),
            high: close + dec!(2),
            low: close - dec!(2),
            close,
            adj_close: close,
            volume,
        }
    }

    #[test]
    fn first_bar_has_no_daily_change() {
        let bars = vec![bar(0, dec!(100), 1_000)];
        let records = enrich_bars("TEST", &bars, Utc::now());
        assert_eq!(records.len(), 1);
        assert!(records[0].daily_change_usd.is_none());
        assert_eq!(records[0].high_52w, dec!(102));
        assert_eq!(records[0].low_52w, dec!(98));
    }

    #[test]
    fn daily_change_from_previous_close() {
        let bars = vec![bar(0, dec!(100), 1_000), bar(1, dec!(102.50), 1_200)];
        let records = enrich_bars("TEST", &bars, Utc::now());
        assert_eq!(records[1].daily_change_usd, Some(dec!(2.50)));
        assert_eq!(records[1].daily_change_pct, Some(dec!(0.025)));
    }

    #[test]
    fn rolling_window_tracks_trailing_extremes() {
        // Close prices rise then fall; the 52w high should stick to the peak.
        let mut bars = Vec::new();
        for day in 0..300u32 {
            let close = if day < 150 {
                Decimal::from(100 + day)
            } else {
                Decimal::from(400 - day)
            };
            bars.push(bar(day, close, 1_000));
        }
        let records = enrich_bars("TEST", &bars, Utc::now());

        // Peak close is 250 at day 150 (high 252); still inside the
        // 252-day window at day 299.
        assert_eq!(records[299].high_52w, dec!(252));
        // The trailing low is the final bar's low (close 101, low 99).
        assert_eq!(records[299].low_52w, dec!(99));
    }

    #[test]
    fn volume_averages_use_short_windows() {
        let bars: Vec<_> = (0..40u32).map(|d| bar(d, dec!(100), (d as u64 + 1) * 100)).collect();
        let records = enrich_bars("TEST", &bars, Utc::now());

        let last = &records[39];
        // 10-day window: volumes 3100..=4000, mean 3550
        assert_eq!(last.avg_volume_10d, 3_550);
        // 30-day window: volumes 1100..=4000, mean 2550
        assert_eq!(last.avg_volume_30d, 2_550);
    }

    #[test]
    fn enrichment_is_deterministic_for_the_same_window() {
        let bars: Vec<_> = (0..20u32).map(|d| bar(d, dec!(50) + Decimal::from(d), 500)).collect();
        let now = Utc::now();
        let first = enrich_bars("TEST", &bars, now);
        let second = enrich_bars("TEST", &bars, now);
        assert_eq!(first, second);
    }
}

use crate::models::{MonthKey, MonthlyPnlBucket, RealizedEvent, TradeStats};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Derives trade statistics from a full-history replay's realized events.
/// Events with |pnl| at or below `noise_threshold` are commission-only noise
/// and ignored. Empty input yields all-zero stats, never NaN.
pub fn trade_stats(events: &[RealizedEvent], noise_threshold: f64) -> TradeStats {
    let pnls: Vec<f64> = events
        .iter()
        .map(|event| event.pnl)
        .filter(|pnl| pnl.is_finite() && pnl.abs() > noise_threshold)
        .collect();

    if pnls.is_empty() {
        return TradeStats::default();
    }

    let wins: Vec<f64> = pnls.iter().copied().filter(|pnl| *pnl > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|pnl| *pnl < 0.0).collect();

    let total_trades = pnls.len() as i32;
    let winning_trades = wins.len() as i32;
    let losing_trades = losses.len() as i32;

    let avg_win = if wins.is_empty() {
        0.0
    } else {
        wins.clone().mean()
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        losses.clone().mean()
    };
    let largest_win = wins.iter().copied().fold(0.0, f64::max);
    let largest_loss = losses.iter().copied().fold(0.0, f64::min);

    TradeStats {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate: winning_trades as f64 / total_trades as f64,
        total_pnl: pnls.iter().sum(),
        avg_pnl: pnls.clone().mean(),
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
    }
}

/// Buckets realized P&L by calendar month, ordered chronologically. Unlike
/// `trade_stats` this keeps commission-only events: the buckets answer "what
/// did this month cost or earn", noise included.
pub fn monthly_realized(events: &[RealizedEvent]) -> Vec<MonthlyPnlBucket> {
    let mut buckets: BTreeMap<MonthKey, (f64, i32)> = BTreeMap::new();
    for event in events {
        let entry = buckets
            .entry(MonthKey::from_datetime(event.timestamp))
            .or_insert((0.0, 0));
        entry.0 += event.pnl;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(month, (realized_pnl, events))| MonthlyPnlBucket {
            month,
            realized_pnl,
            events,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PNL_NOISE_THRESHOLD;
    use chrono::{TimeZone, Utc};

    fn event(pnl: f64, month: u32, day: u32) -> RealizedEvent {
        RealizedEvent {
            symbol: "X".to_string(),
            pnl,
            transaction_id: format!("tx-{}-{}", month, day),
            timestamp: Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_input_yields_all_zero_stats() {
        let stats = trade_stats(&[], DEFAULT_PNL_NOISE_THRESHOLD);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.avg_pnl, 0.0);
        assert!(!stats.win_rate.is_nan());
    }

    #[test]
    fn single_winning_trade_has_full_win_rate() {
        let stats = trade_stats(&[event(499.0, 1, 10)], DEFAULT_PNL_NOISE_THRESHOLD);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert!((stats.win_rate - 1.0).abs() < 1e-9);
        assert!((stats.total_pnl - 499.0).abs() < 1e-9);
        assert!((stats.largest_win - 499.0).abs() < 1e-9);
    }

    #[test]
    fn commission_noise_is_excluded() {
        let events = vec![event(0.005, 1, 5), event(-0.009, 1, 6), event(100.0, 1, 7)];
        let stats = trade_stats(&events, DEFAULT_PNL_NOISE_THRESHOLD);
        assert_eq!(stats.total_trades, 1);
        assert!((stats.total_pnl - 100.0).abs() < 1e-9);
    }

    #[test]
    fn mixes_wins_and_losses_correctly() {
        let events = vec![
            event(200.0, 1, 5),
            event(100.0, 2, 5),
            event(-50.0, 2, 10),
            event(-150.0, 3, 5),
        ];
        let stats = trade_stats(&events, DEFAULT_PNL_NOISE_THRESHOLD);

        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 2);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        assert!((stats.avg_win - 150.0).abs() < 1e-9);
        assert!((stats.avg_loss + 100.0).abs() < 1e-9);
        assert!((stats.largest_win - 200.0).abs() < 1e-9);
        assert!((stats.largest_loss + 150.0).abs() < 1e-9);
        assert!((stats.avg_pnl - 25.0).abs() < 1e-9);
    }

    #[test]
    fn monthly_buckets_are_ordered_and_summed() {
        let events = vec![
            event(100.0, 2, 5),
            event(-30.0, 2, 20),
            event(50.0, 1, 10),
        ];
        let buckets = monthly_realized(&events);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].month, MonthKey { year: 2024, month: 1 });
        assert!((buckets[0].realized_pnl - 50.0).abs() < 1e-9);
        assert_eq!(buckets[1].events, 2);
        assert!((buckets[1].realized_pnl - 70.0).abs() < 1e-9);
    }
}

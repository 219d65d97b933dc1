use crate::models::{MonthlySnapshot, RealizedEvent, SeriesPoint};

/// One point per monthly snapshot, valued at that month's aggregate
/// unrealized P&L. Each snapshot is a self-contained full-history replay,
/// so points are NOT summed across months.
pub fn mark_to_market_series(snapshots: &[MonthlySnapshot]) -> Vec<SeriesPoint> {
    snapshots
        .iter()
        .map(|snapshot| SeriesPoint {
            date: snapshot.month.last_day(),
            value: snapshot.total_unrealized_pnl,
        })
        .collect()
}

/// Fallback curve when no mark-to-market history is available: a true
/// running cumulative sum of realized P&L ordered by transaction time.
pub fn realized_cumulative_series(events: &[RealizedEvent]) -> Vec<SeriesPoint> {
    let mut ordered: Vec<&RealizedEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.timestamp);

    let mut running = 0.0;
    ordered
        .into_iter()
        .map(|event| {
            running += event.pnl;
            SeriesPoint {
                date: event.timestamp.date_naive(),
                value: running,
            }
        })
        .collect()
}

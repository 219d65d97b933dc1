use crate::config::EngineConfig;
use crate::history::{self, ProgressFn};
use crate::ledger;
use crate::models::{MonthlyPnlBucket, MonthlySnapshot, SeriesPoint, TradeStats};
use crate::normalizer::{self, RawTradeRecord};
use crate::oracle::PriceOracle;
use crate::series;
use crate::stats;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Which curve the report carries: the full mark-to-market history, or the
/// realized-only cumulative sum used when the oracle round-trips failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeriesMode {
    MarkToMarket,
    RealizedOnly,
}

/// Data-quality counters for operators. Populating these never changes the
/// success-path output contract.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostics {
    pub transactions_applied: usize,
    pub dropped_other_account: u32,
    pub skipped_malformed: u32,
    pub closes_without_position: u32,
}

/// Everything the presentation layer consumes: plain immutable data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioReport {
    pub history: Vec<MonthlySnapshot>,
    pub stats: TradeStats,
    pub monthly_realized: Vec<MonthlyPnlBucket>,
    pub series: Vec<SeriesPoint>,
    pub series_mode: SeriesMode,
    pub diagnostics: RunDiagnostics,
}

/// Runs the whole pipeline: normalize, replay, aggregate, reconstruct.
///
/// This always produces a complete, internally consistent report. If the
/// monthly reconstruction cannot finish because the oracle is unreachable,
/// the report degrades to the realized-only cumulative series instead of
/// surfacing the failure; partially reconstructed history is discarded.
pub async fn build_report<O: PriceOracle>(
    primary: &[RawTradeRecord],
    secondary: &[RawTradeRecord],
    config: &EngineConfig,
    oracle: &O,
    progress: Option<ProgressFn<'_>>,
    cancel: Option<&AtomicBool>,
) -> PortfolioReport {
    let normalized = normalizer::normalize(primary, secondary, config);
    info!(
        "Normalized {} transaction(s) for account {} ({} dropped, {} malformed)",
        normalized.transactions.len(),
        config.target_account,
        normalized.dropped_other_account,
        normalized.skipped_malformed
    );

    let replayed = ledger::replay(&normalized.transactions, config.position_epsilon);
    let trade_stats = stats::trade_stats(&replayed.events, config.pnl_noise_threshold);
    let monthly_realized = stats::monthly_realized(&replayed.events);

    let diagnostics = RunDiagnostics {
        transactions_applied: replayed.outcomes.len(),
        dropped_other_account: normalized.dropped_other_account,
        skipped_malformed: normalized.skipped_malformed,
        closes_without_position: replayed.diagnostics.closes_without_position,
    };

    let (history, series, series_mode) =
        match history::reconstruct(&normalized.transactions, oracle, config, progress, cancel)
            .await
        {
            Ok(snapshots) => {
                let series = series::mark_to_market_series(&snapshots);
                (snapshots, series, SeriesMode::MarkToMarket)
            }
            Err(err) => {
                warn!(
                    "Monthly reconstruction unavailable ({}); falling back to realized-only series",
                    err
                );
                let series = series::realized_cumulative_series(&replayed.events);
                (Vec::new(), series, SeriesMode::RealizedOnly)
            }
        };

    PortfolioReport {
        history,
        stats: trade_stats,
        monthly_realized,
        series,
        series_mode,
        diagnostics,
    }
}

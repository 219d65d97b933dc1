use anyhow::anyhow;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Asset classes the price oracle understands. Unrecognized source strings
/// are mapped to `Equity` by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Crypto,
    Etf,
    Forex,
}

impl FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equity" | "stock" | "share" => Ok(AssetClass::Equity),
            "crypto" | "cryptocurrency" => Ok(AssetClass::Crypto),
            "etf" | "exchange-traded-fund" => Ok(AssetClass::Etf),
            "forex" | "fx" | "foreign-exchange" | "currency" => Ok(AssetClass::Forex),
            other => Err(anyhow!("Unknown asset class '{}'", other)),
        }
    }
}

/// Operation tags seen in the source exports. The feed mixes English and
/// Spanish labels, so both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Buy,
    Sell,
    Close,
}

impl FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "compra" => Ok(OperationKind::Buy),
            "sell" | "venta" => Ok(OperationKind::Sell),
            "close" | "cierre" => Ok(OperationKind::Close),
            other => Err(anyhow!("Unknown operation tag '{}'", other)),
        }
    }
}

/// Canonical transaction after normalization. Quantity sign is canonical:
/// positive for buys, negative for sells and closes, regardless of how the
/// source record was signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub account: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_shares(shares: f64) -> Self {
        if shares < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Long
        }
    }
}

/// Running position for one instrument during a replay. Owned by the ledger
/// performing the replay; positions whose share count settles at zero are
/// removed rather than kept with a stale cost basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed share count: positive long, negative short.
    pub shares: f64,
    /// Average cost per unit. Meaningless once `shares` reaches zero.
    pub avg_cost: f64,
    pub side: PositionSide,
}

/// Emitted whenever a transaction fully or partially closes an existing
/// position. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedEvent {
    pub symbol: String,
    pub pnl: f64,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-transaction P&L contribution from a ledger replay: zero or
/// commission-only for opens, a realized gain/loss for closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub pnl: f64,
    pub realized: bool,
}

/// Calendar month key, orderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First instant of the following month; transactions strictly before
    /// this belong to the month.
    pub fn end_exclusive(self) -> DateTime<Utc> {
        let next = self.next();
        Utc.with_ymd_and_hms(next.year, next.month, 1, 0, 0, 0)
            .single()
            .expect("first of month is always a valid timestamp")
    }

    /// Last calendar day of the month, used as the oracle as-of date.
    pub fn last_day(self) -> NaiveDate {
        let next = self.next();
        NaiveDate::from_ymd_opt(next.year, next.month, 1)
            .expect("first of month is always a valid date")
            .pred_opt()
            .expect("month end is always a valid date")
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One open instrument inside a monthly snapshot, valued at the month-end
/// close.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAsset {
    pub symbol: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub close_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

/// Mark-to-market view of the portfolio at one month's end. Instruments
/// without a close price that month are listed in `excluded_symbols` and do
/// not contribute to the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySnapshot {
    pub month: MonthKey,
    pub assets: Vec<SnapshotAsset>,
    pub total_value: f64,
    pub total_unrealized_pnl: f64,
    pub excluded_symbols: Vec<String>,
}

/// Aggregate statistics over realized events, fully recomputed each run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

/// Realized P&L accumulated inside one calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPnlBucket {
    pub month: MonthKey,
    pub realized_pnl: f64,
    pub events: i32,
}

/// One point on the equity/P&L curve handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Request entry for the price oracle: one instrument valued as of one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub as_of: NaiveDate,
}

/// Oracle answer for one instrument. `found == false` means no close price
/// exists for the requested date; that is data absence, not an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub found: bool,
}

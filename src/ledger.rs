use crate::models::{
    OperationKind, Position, PositionSide, RealizedEvent, Transaction, TransactionOutcome,
};
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;

/// Data-quality counters gathered during a replay. Nothing in here is fatal;
/// callers surface the counts for auditing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayDiagnostics {
    /// Close transactions that found no tracked position (treated as no-ops).
    pub closes_without_position: u32,
}

/// Result of replaying a transaction sequence from an empty state.
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    /// Open positions after the last transaction, keyed by symbol. Flat
    /// positions are absent, never retained with a stale cost basis.
    pub positions: HashMap<String, Position>,
    /// One event per full or partial close, in transaction order.
    pub events: Vec<RealizedEvent>,
    /// P&L contribution of every transaction, in transaction order.
    pub outcomes: Vec<TransactionOutcome>,
    pub diagnostics: ReplayDiagnostics,
}

/// Average-cost-basis position ledger. This is the single position-update
/// algorithm: the full-history statistics path and the per-month replay path
/// both go through `apply`, so realized and unrealized accounting cannot
/// drift apart. State is owned by the caller; there is no process-wide map.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    epsilon: f64,
    positions: HashMap<String, Position>,
    events: Vec<RealizedEvent>,
    outcomes: Vec<TransactionOutcome>,
    diagnostics: ReplayDiagnostics,
}

impl PositionLedger {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            positions: HashMap::new(),
            events: Vec::new(),
            outcomes: Vec::new(),
            diagnostics: ReplayDiagnostics::default(),
        }
    }

    /// Applies one transaction and returns its P&L contribution: realized
    /// gain/loss on closes, negative commission on plain opens.
    pub fn apply(&mut self, tx: &Transaction) -> f64 {
        let quantity = tx.quantity.abs();
        let (pnl, realized) = match tx.kind {
            OperationKind::Buy => self.apply_buy(tx, quantity),
            OperationKind::Sell => self.apply_sell(tx, quantity),
            OperationKind::Close => self.apply_close(tx),
        };

        if realized {
            self.events.push(RealizedEvent {
                symbol: tx.symbol.clone(),
                pnl,
                transaction_id: tx.id.clone(),
                timestamp: tx.timestamp,
            });
        }
        self.outcomes.push(TransactionOutcome {
            transaction_id: tx.id.clone(),
            pnl,
            realized,
        });
        pnl
    }

    pub fn finish(self) -> ReplayOutcome {
        ReplayOutcome {
            positions: self.positions,
            events: self.events,
            outcomes: self.outcomes,
            diagnostics: self.diagnostics,
        }
    }

    fn apply_buy(&mut self, tx: &Transaction, quantity: f64) -> (f64, bool) {
        match self.positions.remove(&tx.symbol) {
            // Flat or long: the lot averages into the existing basis.
            None => {
                self.store(tx.symbol.clone(), quantity, tx.price);
                (-tx.commission, false)
            }
            Some(position) if position.shares >= 0.0 => {
                let total = position.shares + quantity;
                let avg_cost =
                    (position.shares * position.avg_cost + quantity * tx.price) / total;
                self.store(tx.symbol.clone(), total, avg_cost);
                (-tx.commission, false)
            }
            // Short: this buy is a cover, realized up to the short's size.
            Some(position) => {
                let short_size = -position.shares;
                let covered = quantity.min(short_size);
                let pnl = (position.avg_cost - tx.price) * covered - tx.commission;
                let remaining = position.shares + quantity;
                if remaining > self.epsilon {
                    // Reversal: the excess opens a fresh long at the buy
                    // price; the short's basis is discarded.
                    self.store(tx.symbol.clone(), remaining, tx.price);
                } else {
                    self.store(tx.symbol.clone(), remaining, position.avg_cost);
                }
                (pnl, true)
            }
        }
    }

    fn apply_sell(&mut self, tx: &Transaction, quantity: f64) -> (f64, bool) {
        match self.positions.remove(&tx.symbol) {
            // Flat or short: the sale adds to the short side.
            None => {
                self.store(tx.symbol.clone(), -quantity, tx.price);
                (-tx.commission, false)
            }
            Some(position) if position.shares <= 0.0 => {
                let short_size = -position.shares;
                let total = short_size + quantity;
                let avg_cost = (short_size * position.avg_cost + quantity * tx.price) / total;
                self.store(tx.symbol.clone(), -total, avg_cost);
                (-tx.commission, false)
            }
            // Long: realized close, symmetric to the short cover.
            Some(position) => {
                let covered = quantity.min(position.shares);
                let pnl = (tx.price - position.avg_cost) * covered - tx.commission;
                let remaining = position.shares - quantity;
                if remaining < -self.epsilon {
                    // Reversal: the excess opens a fresh short at the sell price.
                    self.store(tx.symbol.clone(), remaining, tx.price);
                } else {
                    self.store(tx.symbol.clone(), remaining, position.avg_cost);
                }
                (pnl, true)
            }
        }
    }

    fn apply_close(&mut self, tx: &Transaction) -> (f64, bool) {
        match self.positions.remove(&tx.symbol) {
            Some(position) => {
                // (price - avg) * shares is sign-correct for both sides:
                // short positions carry negative shares.
                let pnl = (tx.price - position.avg_cost) * position.shares - tx.commission;
                (pnl, true)
            }
            None => {
                self.diagnostics.closes_without_position += 1;
                warn!(
                    "Close transaction {} for {} found no open position; treated as a no-op",
                    tx.id, tx.symbol
                );
                (0.0, false)
            }
        }
    }

    /// Stores or drops the updated position. Share counts within epsilon of
    /// zero are exactly flat and leave the active set.
    fn store(&mut self, symbol: String, shares: f64, avg_cost: f64) {
        if shares.abs() < self.epsilon {
            return;
        }
        let side = PositionSide::from_shares(shares);
        self.positions.insert(
            symbol.clone(),
            Position {
                symbol,
                shares,
                avg_cost,
                side,
            },
        );
    }
}

/// Replays a chronologically ordered transaction sequence from an empty
/// state.
pub fn replay(transactions: &[Transaction], epsilon: f64) -> ReplayOutcome {
    let mut ledger = PositionLedger::new(epsilon);
    for tx in transactions {
        ledger.apply(tx);
    }
    ledger.finish()
}

/// Replays only the prefix of transactions strictly before `cutoff`. The
/// monthly reconstructor uses this with each month's end so both paths share
/// one algorithm.
pub fn replay_until(
    transactions: &[Transaction],
    cutoff: DateTime<Utc>,
    epsilon: f64,
) -> ReplayOutcome {
    let mut ledger = PositionLedger::new(epsilon);
    for tx in transactions {
        if tx.timestamp >= cutoff {
            break;
        }
        ledger.apply(tx);
    }
    ledger.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POSITION_EPSILON;
    use crate::models::AssetClass;
    use chrono::TimeZone;

    fn tx(
        id: &str,
        symbol: &str,
        kind: OperationKind,
        quantity: f64,
        price: f64,
        commission: f64,
        day: u32,
    ) -> Transaction {
        let signed = match kind {
            OperationKind::Buy => quantity.abs(),
            OperationKind::Sell | OperationKind::Close => -quantity.abs(),
        };
        Transaction {
            id: id.to_string(),
            symbol: symbol.to_string(),
            asset_class: AssetClass::Equity,
            quantity: signed,
            price,
            commission,
            kind,
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            account: "main".to_string(),
        }
    }

    #[test]
    fn long_round_trip_realizes_spread_minus_commissions() {
        let transactions = vec![
            tx("open", "X", OperationKind::Buy, 10.0, 100.0, 1.0, 1),
            tx("close", "X", OperationKind::Close, 10.0, 150.0, 1.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert!(outcome.positions.is_empty());
        assert_eq!(outcome.events.len(), 1);
        assert!((outcome.events[0].pnl - 499.0).abs() < 1e-9);
    }

    #[test]
    fn buy_averages_into_existing_long() {
        let transactions = vec![
            tx("a", "X", OperationKind::Buy, 10.0, 100.0, 0.0, 1),
            tx("b", "X", OperationKind::Buy, 10.0, 120.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);
        let position = &outcome.positions["X"];

        assert!((position.shares - 20.0).abs() < 1e-9);
        assert!((position.avg_cost - 110.0).abs() < 1e-9);
        assert_eq!(position.side, PositionSide::Long);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn sell_averages_into_existing_short() {
        let transactions = vec![
            tx("a", "X", OperationKind::Sell, 10.0, 50.0, 0.0, 1),
            tx("b", "X", OperationKind::Sell, 30.0, 70.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);
        let position = &outcome.positions["X"];

        assert!((position.shares + 40.0).abs() < 1e-9);
        assert!((position.avg_cost - 65.0).abs() < 1e-9);
        assert_eq!(position.side, PositionSide::Short);
    }

    #[test]
    fn buy_exceeding_short_splits_into_cover_and_new_long() {
        let transactions = vec![
            tx("short", "X", OperationKind::Sell, 5.0, 50.0, 0.0, 1),
            tx("cover", "X", OperationKind::Buy, 8.0, 40.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert_eq!(outcome.events.len(), 1);
        assert!((outcome.events[0].pnl - 50.0).abs() < 1e-9);

        let position = &outcome.positions["X"];
        assert!((position.shares - 3.0).abs() < 1e-9);
        assert!((position.avg_cost - 40.0).abs() < 1e-9);
        assert_eq!(position.side, PositionSide::Long);
    }

    #[test]
    fn sell_exceeding_long_splits_into_close_and_new_short() {
        let transactions = vec![
            tx("open", "X", OperationKind::Buy, 5.0, 100.0, 0.0, 1),
            tx("flip", "X", OperationKind::Sell, 8.0, 110.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert_eq!(outcome.events.len(), 1);
        assert!((outcome.events[0].pnl - 50.0).abs() < 1e-9);

        let position = &outcome.positions["X"];
        assert!((position.shares + 3.0).abs() < 1e-9);
        assert!((position.avg_cost - 110.0).abs() < 1e-9);
        assert_eq!(position.side, PositionSide::Short);
    }

    #[test]
    fn partial_sell_keeps_cost_basis() {
        let transactions = vec![
            tx("open", "X", OperationKind::Buy, 10.0, 100.0, 0.0, 1),
            tx("trim", "X", OperationKind::Sell, 4.0, 130.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert!((outcome.events[0].pnl - 120.0).abs() < 1e-9);
        let position = &outcome.positions["X"];
        assert!((position.shares - 6.0).abs() < 1e-9);
        assert!((position.avg_cost - 100.0).abs() < 1e-9);
    }

    #[test]
    fn close_on_short_position_profits_when_price_fell() {
        let transactions = vec![
            tx("short", "X", OperationKind::Sell, 10.0, 80.0, 0.0, 1),
            tx("close", "X", OperationKind::Close, 10.0, 60.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert!(outcome.positions.is_empty());
        assert!((outcome.events[0].pnl - 200.0).abs() < 1e-9);
    }

    #[test]
    fn close_without_position_is_a_counted_no_op() {
        let transactions = vec![tx("ghost", "X", OperationKind::Close, 10.0, 60.0, 0.0, 1)];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert!(outcome.positions.is_empty());
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.diagnostics.closes_without_position, 1);
        assert_eq!(outcome.outcomes.len(), 1);
        assert_eq!(outcome.outcomes[0].pnl, 0.0);
    }

    #[test]
    fn residual_within_epsilon_leaves_no_position() {
        let transactions = vec![
            tx("open", "X", OperationKind::Buy, 10.0, 100.0, 0.0, 1),
            tx("exit", "X", OperationKind::Sell, 10.00005, 100.0, 0.0, 2),
        ];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);
        assert!(outcome.positions.is_empty());
    }

    #[test]
    fn open_contributions_are_commission_only() {
        let transactions = vec![tx("open", "X", OperationKind::Buy, 10.0, 100.0, 2.5, 1)];
        let outcome = replay(&transactions, DEFAULT_POSITION_EPSILON);

        assert_eq!(outcome.outcomes.len(), 1);
        assert!((outcome.outcomes[0].pnl + 2.5).abs() < 1e-9);
        assert!(!outcome.outcomes[0].realized);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn replay_until_only_applies_prefix() {
        let transactions = vec![
            tx("open", "X", OperationKind::Buy, 10.0, 100.0, 0.0, 1),
            tx("close", "X", OperationKind::Close, 10.0, 150.0, 0.0, 20),
        ];
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let outcome = replay_until(&transactions, cutoff, DEFAULT_POSITION_EPSILON);

        assert_eq!(outcome.positions.len(), 1);
        assert!(outcome.events.is_empty());
    }
}

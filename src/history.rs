use crate::config::EngineConfig;
use crate::ledger;
use crate::models::{
    AssetClass, MonthKey, MonthlySnapshot, PriceRequest, SnapshotAsset, Transaction,
};
use crate::oracle::{OracleError, PriceOracle};
use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Invoked after each completed month with (months done, months total, month
/// label). Lets a caller render progress without the engine knowing about
/// any UI.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(usize, usize, &str) + Send);

/// Rebuilds the portfolio's month-end state from the first transaction's
/// month through the configured as-of month, inclusive.
///
/// Each month is a full replay of the transaction prefix up to that month's
/// end through the shared ledger algorithm, never an incremental update, so
/// overlapping prefixes always agree. Instruments the oracle has no price
/// for are excluded from that month's aggregates and listed on the
/// snapshot. Setting `cancel` stops the run between months; the completed
/// prefix is returned as-is.
pub async fn reconstruct<O: PriceOracle>(
    transactions: &[Transaction],
    oracle: &O,
    config: &EngineConfig,
    mut progress: Option<ProgressFn<'_>>,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<MonthlySnapshot>, OracleError> {
    let Some(first) = transactions.first() else {
        return Ok(Vec::new());
    };

    let mut months = Vec::new();
    let mut cursor = MonthKey::from_datetime(first.timestamp);
    let last = MonthKey::from_date(config.as_of);
    while cursor <= last {
        months.push(cursor);
        cursor = cursor.next();
    }
    let total = months.len();

    let asset_classes = asset_classes_by_symbol(transactions);
    let mut snapshots = Vec::with_capacity(total);

    for (index, month) in months.into_iter().enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            info!(
                "Reconstruction cancelled after {}/{} month(s)",
                index, total
            );
            break;
        }

        let snapshot = reconstruct_month(transactions, oracle, config, &asset_classes, month).await?;
        snapshots.push(snapshot);

        if let Some(callback) = progress.as_mut() {
            callback(index + 1, total, &month.to_string());
        }
    }

    Ok(snapshots)
}

async fn reconstruct_month<O: PriceOracle>(
    transactions: &[Transaction],
    oracle: &O,
    config: &EngineConfig,
    asset_classes: &HashMap<String, AssetClass>,
    month: MonthKey,
) -> Result<MonthlySnapshot, OracleError> {
    let outcome = ledger::replay_until(
        transactions,
        month.end_exclusive(),
        config.position_epsilon,
    );

    // One batched oracle round-trip for every instrument open this month.
    let as_of = month.last_day();
    let mut requests: Vec<PriceRequest> = outcome
        .positions
        .values()
        .map(|position| PriceRequest {
            symbol: position.symbol.clone(),
            asset_class: asset_classes
                .get(&position.symbol)
                .copied()
                .unwrap_or(AssetClass::Equity),
            as_of,
        })
        .collect();
    requests.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let quotes = if requests.is_empty() {
        HashMap::new()
    } else {
        oracle.closing_prices(&requests).await?
    };

    let mut assets = Vec::new();
    let mut excluded_symbols = Vec::new();
    let mut total_value = 0.0;
    let mut total_unrealized_pnl = 0.0;

    for request in &requests {
        let position = &outcome.positions[&request.symbol];
        let quote = quotes.get(&request.symbol).copied();
        match quote {
            Some(quote) if quote.found => {
                // Sign-correct for shorts: negative shares flip both value
                // and the unrealized spread.
                let market_value = position.shares * quote.price;
                let unrealized_pnl = (quote.price - position.avg_cost) * position.shares;
                total_value += market_value;
                total_unrealized_pnl += unrealized_pnl;
                assets.push(SnapshotAsset {
                    symbol: position.symbol.clone(),
                    shares: position.shares,
                    avg_cost: position.avg_cost,
                    close_price: quote.price,
                    market_value,
                    unrealized_pnl,
                });
            }
            _ => excluded_symbols.push(position.symbol.clone()),
        }
    }

    Ok(MonthlySnapshot {
        month,
        assets,
        total_value,
        total_unrealized_pnl,
        excluded_symbols,
    })
}

fn asset_classes_by_symbol(transactions: &[Transaction]) -> HashMap<String, AssetClass> {
    let mut classes = HashMap::new();
    for tx in transactions {
        classes.insert(tx.symbol.clone(), tx.asset_class);
    }
    classes
}

use crate::config::EngineConfig;
use crate::models::{AssetClass, OperationKind, Transaction};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

/// Raw record as exported by the transaction sources. Both feeds share this
/// loose shape; every field is optional here so one malformed record never
/// fails the whole batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTradeRecord {
    #[serde(default, alias = "uid")]
    pub id: Option<Value>,
    #[serde(default, alias = "ticker", alias = "instrument")]
    pub symbol: Option<String>,
    #[serde(default, alias = "assetClass", alias = "class")]
    pub asset_class: Option<String>,
    #[serde(default, alias = "qty", alias = "shares")]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, alias = "fee")]
    pub commission: Option<f64>,
    #[serde(default, alias = "type", alias = "kind")]
    pub operation: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, alias = "datetime")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "accountId", alias = "account_id")]
    pub account: Option<String>,
}

/// Canonical transactions plus data-quality counters for the run.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub transactions: Vec<Transaction>,
    /// Records belonging to some other account, dropped by contract.
    pub dropped_other_account: u32,
    /// Records skipped because a required field was missing or unparseable.
    pub skipped_malformed: u32,
}

/// Converts the two raw collections into one chronologically sorted sequence
/// of canonical transactions for the configured target account. Pure
/// function of its inputs; sorting is stable so records with equal
/// timestamps keep their input relative order.
pub fn normalize(
    primary: &[RawTradeRecord],
    secondary: &[RawTradeRecord],
    config: &EngineConfig,
) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    for record in primary.iter().chain(secondary.iter()) {
        match canonicalize(record, &config.target_account) {
            Canonical::Transaction(tx) => outcome.transactions.push(tx),
            Canonical::OtherAccount => outcome.dropped_other_account += 1,
            Canonical::Malformed => outcome.skipped_malformed += 1,
        }
    }

    // Stable sort: ties on the composite (date, time) key preserve input order.
    outcome.transactions.sort_by_key(|tx| tx.timestamp);

    if outcome.skipped_malformed > 0 {
        warn!(
            "Skipped {} malformed transaction record(s)",
            outcome.skipped_malformed
        );
    }

    outcome
}

enum Canonical {
    Transaction(Transaction),
    OtherAccount,
    Malformed,
}

fn canonicalize(record: &RawTradeRecord, target_account: &str) -> Canonical {
    let Some(account) = record.account.as_deref().map(str::trim) else {
        warn!("Dropping record without an account reference");
        return Canonical::Malformed;
    };
    if account != target_account {
        return Canonical::OtherAccount;
    }

    let Some(id) = record_id(record) else {
        warn!("Dropping record without an id");
        return Canonical::Malformed;
    };
    let Some(symbol) = normalize_symbol(record.symbol.as_deref()) else {
        warn!("Dropping record {} without an instrument symbol", id);
        return Canonical::Malformed;
    };
    let Some(raw_operation) = record.operation.as_deref() else {
        warn!("Dropping record {} without an operation tag", id);
        return Canonical::Malformed;
    };
    let kind = match raw_operation.parse::<OperationKind>() {
        Ok(kind) => kind,
        Err(err) => {
            warn!("Dropping record {}: {}", id, err);
            return Canonical::Malformed;
        }
    };
    let Some(quantity) = record.quantity.filter(|value| value.is_finite()) else {
        warn!("Dropping record {} without a usable quantity", id);
        return Canonical::Malformed;
    };
    let Some(price) = record.price.filter(|value| value.is_finite() && *value >= 0.0) else {
        warn!("Dropping record {} without a usable price", id);
        return Canonical::Malformed;
    };
    let Some(timestamp) = parse_timestamp(record) else {
        warn!("Dropping record {} without a usable timestamp", id);
        return Canonical::Malformed;
    };

    let asset_class = match record.asset_class.as_deref() {
        Some(raw) => raw.parse::<AssetClass>().unwrap_or_else(|_| {
            warn!(
                "Record {}: unknown asset class '{}', defaulting to equity",
                id, raw
            );
            AssetClass::Equity
        }),
        None => AssetClass::Equity,
    };

    // Canonical sign: buys are positive, sells and closes negative, whatever
    // sign the source carried.
    let quantity = match kind {
        OperationKind::Buy => quantity.abs(),
        OperationKind::Sell | OperationKind::Close => -quantity.abs(),
    };

    Canonical::Transaction(Transaction {
        id,
        symbol,
        asset_class,
        quantity,
        price,
        commission: record.commission.filter(|value| value.is_finite()).unwrap_or(0.0),
        kind,
        timestamp,
        account: account.to_string(),
    })
}

fn record_id(record: &RawTradeRecord) -> Option<String> {
    match record.id.as_ref()? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn normalize_symbol(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_uppercase())
}

fn parse_timestamp(record: &RawTradeRecord) -> Option<DateTime<Utc>> {
    if let Some(raw) = record.timestamp.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    let date = NaiveDate::parse_from_str(record.date.as_deref()?.trim(), "%Y-%m-%d").ok()?;
    let time = match record.time.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()?,
        _ => NaiveTime::MIN,
    };
    Some(DateTime::from_naive_utc_and_offset(date.and_time(time), Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, operation: &str, quantity: f64, date: &str, account: &str) -> RawTradeRecord {
        RawTradeRecord {
            id: Some(json!(id)),
            symbol: Some("aapl".to_string()),
            asset_class: Some("equity".to_string()),
            quantity: Some(quantity),
            price: Some(100.0),
            commission: Some(0.0),
            operation: Some(operation.to_string()),
            date: Some(date.to_string()),
            time: None,
            timestamp: None,
            account: Some(account.to_string()),
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::new("main")
    }

    #[test]
    fn filters_other_accounts_silently() {
        let primary = vec![
            record("t1", "Buy", 10.0, "2024-01-02", "main"),
            record("t2", "Buy", 5.0, "2024-01-03", "other"),
        ];
        let outcome = normalize(&primary, &[], &config());
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.dropped_other_account, 1);
        assert_eq!(outcome.skipped_malformed, 0);
    }

    #[test]
    fn canonicalizes_signs_regardless_of_source_sign() {
        let primary = vec![
            record("t1", "Buy", -10.0, "2024-01-02", "main"),
            record("t2", "Venta", 5.0, "2024-01-03", "main"),
            record("t3", "Cierre", 5.0, "2024-01-04", "main"),
        ];
        let outcome = normalize(&primary, &[], &config());
        let quantities: Vec<f64> = outcome.transactions.iter().map(|tx| tx.quantity).collect();
        assert_eq!(quantities, vec![10.0, -5.0, -5.0]);
    }

    #[test]
    fn merges_and_sorts_both_collections_chronologically() {
        let primary = vec![record("t2", "Buy", 1.0, "2024-02-01", "main")];
        let secondary = vec![
            record("t1", "Buy", 1.0, "2024-01-15", "main"),
            record("t3", "Sell", 1.0, "2024-03-01", "main"),
        ];
        let outcome = normalize(&primary, &secondary, &config());
        let ids: Vec<&str> = outcome
            .transactions
            .iter()
            .map(|tx| tx.id.as_str())
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn equal_timestamps_preserve_input_order() {
        let primary = vec![
            record("first", "Buy", 1.0, "2024-01-02", "main"),
            record("second", "Buy", 1.0, "2024-01-02", "main"),
        ];
        let outcome = normalize(&primary, &[], &config());
        let ids: Vec<&str> = outcome
            .transactions
            .iter()
            .map(|tx| tx.id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn skips_malformed_records_without_failing_the_batch() {
        let mut missing_price = record("t2", "Buy", 1.0, "2024-01-02", "main");
        missing_price.price = None;
        let mut bad_tag = record("t3", "dividend", 1.0, "2024-01-03", "main");
        bad_tag.operation = Some("dividend".to_string());
        let primary = vec![
            record("t1", "Buy", 1.0, "2024-01-01", "main"),
            missing_price,
            bad_tag,
        ];
        let outcome = normalize(&primary, &[], &config());
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.skipped_malformed, 2);
    }

    #[test]
    fn unknown_asset_class_defaults_to_equity() {
        let mut raw = record("t1", "Buy", 1.0, "2024-01-02", "main");
        raw.asset_class = Some("bond".to_string());
        let outcome = normalize(&[raw], &[], &config());
        assert_eq!(outcome.transactions[0].asset_class, AssetClass::Equity);
    }

    #[test]
    fn parses_date_time_and_rfc3339_timestamps() {
        let mut with_time = record("t1", "Buy", 1.0, "2024-01-02", "main");
        with_time.time = Some("14:30:00".to_string());
        let mut with_rfc3339 = record("t2", "Buy", 1.0, "2024-01-02", "main");
        with_rfc3339.date = None;
        with_rfc3339.timestamp = Some("2024-01-02T09:15:00Z".to_string());

        let outcome = normalize(&[with_time, with_rfc3339], &[], &config());
        assert_eq!(outcome.transactions.len(), 2);
        // RFC3339 record at 09:15 sorts before the 14:30 one.
        assert_eq!(outcome.transactions[0].id, "t2");
    }
}

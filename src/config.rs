use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

/// Share counts with absolute value below this are treated as exactly flat,
/// absorbing floating-point drift from repeated partial fills.
pub const DEFAULT_POSITION_EPSILON: f64 = 0.0001;

/// Realized events with |pnl| at or below this are commission-only noise and
/// excluded from trade statistics.
pub const DEFAULT_PNL_NOISE_THRESHOLD: f64 = 0.01;

/// Engine configuration. Built once from a settings map (environment
/// variables in the CLI) and passed immutably through the pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Source records whose account reference does not match are dropped.
    pub target_account: String,
    /// Position-closed detection threshold, absolute shares.
    pub position_epsilon: f64,
    /// Minimum |pnl| for a realized event to count toward statistics.
    pub pnl_noise_threshold: f64,
    /// End of the reconstruction window ("now" for live runs).
    pub as_of: NaiveDate,
}

impl EngineConfig {
    pub fn new(target_account: impl Into<String>) -> Self {
        Self {
            target_account: target_account.into(),
            position_epsilon: DEFAULT_POSITION_EPSILON,
            pnl_noise_threshold: DEFAULT_PNL_NOISE_THRESHOLD,
            as_of: Utc::now().date_naive(),
        }
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let target_account = require_setting(settings, "TARGET_ACCOUNT")?.to_string();
        let position_epsilon = optional_setting_f64(
            settings,
            "POSITION_EPSILON",
            DEFAULT_POSITION_EPSILON,
            Some(0.0),
        )?;
        let pnl_noise_threshold = optional_setting_f64(
            settings,
            "PNL_NOISE_THRESHOLD",
            DEFAULT_PNL_NOISE_THRESHOLD,
            Some(0.0),
        )?;
        let as_of = match settings.get("AS_OF_DATE").map(|value| value.trim()) {
            Some(raw) if !raw.is_empty() => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| {
                    anyhow!(
                        "Setting AS_OF_DATE must be a date in YYYY-MM-DD format (value: {})",
                        raw
                    )
                })?,
            _ => Utc::now().date_naive(),
        };

        Ok(Self {
            target_account,
            position_epsilon,
            pnl_noise_threshold,
            as_of,
        })
    }

    /// Same as `from_settings_map`, with the target account supplied by the
    /// caller (a CLI flag) taking precedence over the settings map. Lets a
    /// run work without TARGET_ACCOUNT in the environment.
    pub fn from_settings_map_with_account(
        settings: &HashMap<String, String>,
        account: Option<&str>,
    ) -> Result<Self> {
        match account.map(str::trim).filter(|value| !value.is_empty()) {
            Some(account) => {
                let mut settings = settings.clone();
                settings.insert("TARGET_ACCOUNT".to_string(), account.to_string());
                Self::from_settings_map(&settings)
            }
            None => Self::from_settings_map(settings),
        }
    }
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
) -> Result<f64> {
    let Some(raw) = settings.get(key).map(|value| value.trim()) else {
        return Ok(default);
    };
    if raw.is_empty() {
        return Ok(default);
    }
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    Ok(value)
}

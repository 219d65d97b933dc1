pub mod config;
pub mod history;
pub mod ledger;
pub mod models;
pub mod normalizer;
pub mod oracle;
pub mod oracle_http;
pub mod report;
mod retry;
pub mod series;
pub mod stats;

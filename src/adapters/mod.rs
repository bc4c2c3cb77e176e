pub mod bridge;
pub mod ledger_http;
pub mod snapshot_db;

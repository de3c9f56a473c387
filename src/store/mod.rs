//! Durable delivery-log and template storage (SQLite).

pub mod logs;
pub mod schema;

pub use logs::LogStore;

//! Service layer for bank-service.

pub mod database;
pub mod metrics;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};

pub mod exports;
pub mod health;
pub mod invoices;
pub mod orders;

pub use health::{health_check, metrics_endpoint, readiness_check};

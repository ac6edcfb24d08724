pub mod health;
pub mod optimize;
pub mod url_metrics;

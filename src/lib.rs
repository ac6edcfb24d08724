// Library crate; the binary and the integration tests both build on it.

pub mod config;
pub mod detection;
pub mod error;
pub mod extensions;
pub mod gc;
pub mod group;
pub mod html;
pub mod links;
pub mod optimizer;
pub mod routes;
pub mod schema;
pub mod server;
pub mod state;
pub mod storage_lock;
pub mod store;
pub mod url_metric;
pub mod visitor;

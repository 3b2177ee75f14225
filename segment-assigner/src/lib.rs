pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod metrics_consts;
pub mod rebalancer;
pub mod store;
pub mod types;
pub mod util;

use std::time::Duration;

use envconfig::Envconfig;
use segment_assignment::RebalanceOptions;

use crate::driver::DriverConfig;
use crate::rebalancer::RebalancerConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── etcd ────────────────────────────────────────────────────────
    #[envconfig(default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    #[envconfig(default = "/segment-assigner/")]
    pub etcd_prefix: String,

    /// Table this process rebalances.
    pub table_name: String,

    // ── Health and metrics server ───────────────────────────────────
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    // ── Rebalancing ─────────────────────────────────────────────────
    #[envconfig(default = "5")]
    pub max_write_attempts: usize,

    #[envconfig(default = "1000")]
    pub convergence_poll_interval_ms: u64,

    #[envconfig(default = "1")]
    pub rebalance_debounce_interval_secs: u64,

    #[envconfig(default = "false")]
    pub rebalance_dry_run: bool,

    #[envconfig(default = "false")]
    pub rebalance_downtime: bool,

    #[envconfig(default = "false")]
    pub rebalance_bootstrap: bool,

    #[envconfig(default = "true")]
    pub rebalance_include_consuming: bool,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn convergence_poll_interval(&self) -> Duration {
        Duration::from_millis(self.convergence_poll_interval_ms)
    }

    pub fn rebalance_debounce_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_debounce_interval_secs)
    }

    pub fn rebalance_options(&self) -> RebalanceOptions {
        RebalanceOptions {
            dry_run: self.rebalance_dry_run,
            downtime: self.rebalance_downtime,
            bootstrap: self.rebalance_bootstrap,
            include_consuming: self.rebalance_include_consuming,
        }
    }

    pub fn rebalancer_config(&self) -> RebalancerConfig {
        RebalancerConfig {
            options: self.rebalance_options(),
            poll_interval: self.convergence_poll_interval(),
            debounce_interval: self.rebalance_debounce_interval(),
            driver: DriverConfig {
                max_write_attempts: self.max_write_attempts,
            },
        }
    }
}

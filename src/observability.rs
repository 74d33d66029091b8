//! Observability for scree.
//!
//! Provides logging initialization and metric registration.

use crate::config::ObservabilityConfig;
use crate::error::{Result, ScreeError};
use metrics::counter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ScreeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ScreeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    Ok(())
}

/// Register standard rebalance metrics.
pub fn register_metrics() {
    counter!("scree_reb_tx_objects_total").absolute(0);
    counter!("scree_reb_tx_bytes_total").absolute(0);
    counter!("scree_reb_rx_objects_total").absolute(0);
    counter!("scree_reb_rx_bytes_total").absolute(0);
    counter!("scree_reb_retransmits_total").absolute(0);
    counter!("scree_resilver_moved_total").absolute(0);
}

/// Record one transmitted object.
pub fn record_reb_tx(bytes: u64) {
    counter!("scree_reb_tx_objects_total").increment(1);
    counter!("scree_reb_tx_bytes_total").increment(bytes);
}

/// Record one received object.
pub fn record_reb_rx(bytes: u64) {
    counter!("scree_reb_rx_objects_total").increment(1);
    counter!("scree_reb_rx_bytes_total").increment(bytes);
}

/// Record one retransmitted object.
pub fn record_reb_retransmit() {
    counter!("scree_reb_retransmits_total").increment(1);
}

/// Record one object relocated by resilver.
pub fn record_resilver_move() {
    counter!("scree_resilver_moved_total").increment(1);
}

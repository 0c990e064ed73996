//! Prometheus gauges exported by the node monitor.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

use crate::monitor::DbSize;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DbSizeLabels {
    pub kind: String,
}

#[derive(Clone)]
pub struct MonitorMetrics {
    pub(crate) head_block_num: Gauge<i64>,
    pub(crate) head_block_time_drift: Gauge<f64, AtomicU64>,
    pub(crate) db_size_bytes: Family<DbSizeLabels, Gauge<i64>>,
    pub(crate) is_block_producer: Gauge<i64>,
}

impl MonitorMetrics {
    /// Registers every gauge under a `node` sub-registry.
    pub fn register(registry: &mut Registry) -> Self {
        let sub = registry.sub_registry_with_prefix("node");

        let head_block_num = Gauge::<i64>::default();
        sub.register(
            "head_block_num",
            "Head block number reported by the managed node",
            head_block_num.clone(),
        );

        let head_block_time_drift = Gauge::<f64, AtomicU64>::default();
        sub.register(
            "head_block_time_drift",
            "Seconds between now and the node's head block time",
            head_block_time_drift.clone(),
        );

        let db_size_bytes = Family::<DbSizeLabels, Gauge<i64>>::default();
        sub.register(
            "db_size_bytes",
            "Node database size by kind (free, used, total)",
            db_size_bytes.clone(),
        );

        let is_block_producer = Gauge::<i64>::default();
        sub.register(
            "is_block_producer",
            "1 while the node is an active, un-paused block producer",
            is_block_producer.clone(),
        );

        Self {
            head_block_num,
            head_block_time_drift,
            db_size_bytes,
            is_block_producer,
        }
    }

    pub fn set_head_block(&self, num: u64, drift: chrono::Duration) {
        self.head_block_num.set(num as i64);
        self.head_block_time_drift
            .set(drift.num_milliseconds() as f64 / 1000.0);
    }

    pub fn set_db_size(&self, size: &DbSize) {
        for (kind, bytes) in [
            ("free", size.free_bytes),
            ("used", size.used_bytes),
            ("total", size.total_bytes),
        ] {
            self.db_size_bytes
                .get_or_create(&DbSizeLabels { kind: kind.to_string() })
                .set(bytes as i64);
        }
    }

    pub fn set_is_block_producer(&self, producing: bool) {
        self.is_block_producer.set(producing as i64);
    }
}

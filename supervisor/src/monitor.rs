use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::Clock;

use crate::metrics::MonitorMetrics;

#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub head_block_num: u64,
    pub head_block_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbSize {
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct NodeError(pub String);

impl std::error::Error for NodeError {}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node query failed: {}", self.0)
    }
}

/// Minimal RPC surface the monitor needs from the managed node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn chain_info(&self) -> Result<ChainInfo, NodeError>;
    async fn db_size(&self) -> Result<DbSize, NodeError>;
    async fn producer_paused(&self) -> Result<bool, NodeError>;
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
    pub db_size_interval: Duration,
    /// Readiness requires head drift at or below this; zero disables the
    /// latency requirement.
    pub readiness_max_latency: Duration,
    pub monitor_head_block: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            db_size_interval: Duration::from_secs(30),
            readiness_max_latency: Duration::ZERO,
            monitor_head_block: true,
        }
    }
}

const MAX_CHAIN_INFO_FAILURES: u32 = 5;

/// Readiness flag shared with the health endpoint. Transitions are logged
/// once per edge.
#[derive(Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_on(&self) {
        if self
            .ready
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("node is now assumed to be ready");
        }
    }

    fn set_off(&self) {
        if self
            .ready
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("node is not ready anymore");
        }
    }
}

/// Periodic probe of the managed node.
///
/// Every `probe_interval` while the node is running: query chain info,
/// update the head gauges, maintain readiness. DB size is refreshed on its
/// own slower cadence, and producer pause state is polled only while the
/// node is an active producer.
pub struct Monitor {
    client: Arc<dyn NodeClient>,
    metrics: MonitorMetrics,
    readiness: Readiness,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    node_running: Arc<AtomicBool>,
    active_producer: Arc<AtomicBool>,

    chain_info_failures: u32,
    last_db_size_at: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(
        client: Arc<dyn NodeClient>,
        metrics: MonitorMetrics,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        node_running: Arc<AtomicBool>,
        active_producer: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            metrics,
            readiness: Readiness::default(),
            config,
            clock,
            node_running,
            active_producer,
            chain_info_failures: 0,
            last_db_size_at: None,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("starting node monitor");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.probe_interval) => self.probe().await,
            }
        }
    }

    async fn probe(&mut self) {
        if !self.node_running.load(Ordering::SeqCst) {
            self.chain_info_failures = 0;
            return;
        }

        let info = match self.client.chain_info().await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "failed getting chain info from node");
                self.chain_info_failures += 1;
                if self.chain_info_failures >= MAX_CHAIN_INFO_FAILURES {
                    self.readiness.set_off();
                }
                return;
            }
        };
        self.chain_info_failures = 0;

        let drift = self.clock.now() - info.head_block_time;
        debug!(head_block_num = info.head_block_num, drift_ms = drift.num_milliseconds(), "got chain info");
        if self.config.monitor_head_block {
            self.metrics.set_head_block(info.head_block_num, drift);
        }

        // Negative drift means the node clock runs ahead of ours; that head
        // is as fresh as it gets.
        let within_latency = match drift.to_std() {
            Ok(drift) => drift <= self.config.readiness_max_latency,
            Err(_) => true,
        };
        if self.config.readiness_max_latency.is_zero() || within_latency {
            self.readiness.set_on();
        }

        if self.active_producer.load(Ordering::SeqCst) {
            match self.client.producer_paused().await {
                Ok(paused) => self.metrics.set_is_block_producer(!paused),
                Err(err) => debug!(error = %err, "unable to check if producer is paused"),
            }
        }

        let now = self.clock.now();
        let db_size_due = match self.last_db_size_at {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |elapsed| {
                elapsed >= self.config.db_size_interval
            }),
        };
        if db_size_due {
            match self.client.db_size().await {
                Ok(size) => {
                    self.last_db_size_at = Some(now);
                    self.metrics.set_db_size(&size);
                }
                Err(err) => info!(error = %err, "unable to get db size from node"),
            }
        }
    }
}

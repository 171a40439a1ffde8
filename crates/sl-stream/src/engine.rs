use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;

/// Encoder-reported throughput and latency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub bitrate_kbps: u32,
    pub latency_ms: u32,
}

/// The native capture/encode/transport engine.
///
/// Calls are synchronous and may block; the controller runs them on the
/// blocking pool. A start or stop that returns `Ok(false)` is a refusal, an
/// `Err` is a fault; the controller treats both as failures.
pub trait StreamEngine: Send + Sync + 'static {
    fn start(&self, config: &StreamConfig) -> anyhow::Result<bool>;

    fn stop(&self) -> anyhow::Result<bool>;

    fn stats(&self) -> anyhow::Result<Stats>;

    /// Whether the engine still considers its session alive
    fn is_running(&self) -> bool;
}

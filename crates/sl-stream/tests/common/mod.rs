use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;
use sl_stream::{ControllerSettings, Stats, StreamConfig, StreamEngine};

pub const POLL: Duration = Duration::from_millis(40);

pub fn settings() -> ControllerSettings {
    ControllerSettings {
        poll_interval: POLL,
        max_consecutive_poll_failures: 3,
        start_timeout: Duration::from_millis(300),
        stop_timeout: Duration::from_millis(300),
    }
}

pub fn hd_config() -> StreamConfig {
    StreamConfig {
        bitrate_kbps: 12000,
        width: 1920,
        height: 1080,
        fps: 90,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Accept,
    Refuse,
    Fault,
    Hang(Duration),
}

/// Engine double with call counters and switchable failure modes
pub struct ScriptedEngine {
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    /// Starts that returned, including ones the controller stopped waiting for
    pub starts_completed: AtomicUsize,
    pub start: Mutex<StartBehavior>,
    /// Extra time `stop` and `is_running` take before answering
    pub stop_delay: Mutex<Duration>,
    pub liveness_delay: Mutex<Duration>,
    pub stop_succeeds: AtomicBool,
    pub stats_fail: AtomicBool,
    pub running: AtomicBool,
    pub stats: Mutex<Stats>,
    pub last_config: Mutex<Option<StreamConfig>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            starts_completed: AtomicUsize::new(0),
            start: Mutex::new(StartBehavior::Accept),
            stop_delay: Mutex::new(Duration::ZERO),
            liveness_delay: Mutex::new(Duration::ZERO),
            stop_succeeds: AtomicBool::new(true),
            stats_fail: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stats: Mutex::new(Stats {
                bitrate_kbps: 11800,
                latency_ms: 14,
            }),
            last_config: Mutex::new(None),
        }
    }
}

impl ScriptedEngine {
    pub fn polls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }
}

impl StreamEngine for ScriptedEngine {
    fn start(&self, config: &StreamConfig) -> anyhow::Result<bool> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(*config);
        let behavior = *self.start.lock();
        let accepted = match behavior {
            StartBehavior::Accept => true,
            StartBehavior::Refuse => false,
            StartBehavior::Fault => {
                self.starts_completed.fetch_add(1, Ordering::SeqCst);
                bail!("capture device unavailable")
            }
            StartBehavior::Hang(delay) => {
                std::thread::sleep(delay);
                true
            }
        };
        if accepted {
            self.running.store(true, Ordering::SeqCst);
        }
        self.starts_completed.fetch_add(1, Ordering::SeqCst);
        Ok(accepted)
    }

    fn stop(&self) -> anyhow::Result<bool> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stop_delay.lock();
        std::thread::sleep(delay);
        self.running.store(false, Ordering::SeqCst);
        Ok(self.stop_succeeds.load(Ordering::SeqCst))
    }

    fn stats(&self) -> anyhow::Result<Stats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.stats_fail.load(Ordering::SeqCst) {
            bail!("stats unavailable");
        }
        Ok(*self.stats.lock())
    }

    fn is_running(&self) -> bool {
        let delay = *self.liveness_delay.lock();
        std::thread::sleep(delay);
        self.running.load(Ordering::SeqCst)
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

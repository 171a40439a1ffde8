use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StreamError};

/// Encoder parameters for one session. Fixed once the session starts; a
/// change means stop and start again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("bitrate_kbps", self.bitrate_kbps),
            ("width", self.width),
            ("height", self.height),
            ("fps", self.fps),
        ];
        match fields.into_iter().find(|(_, value)| *value == 0) {
            Some((field, value)) => Err(StreamError::Validation { field, value }),
            None => Ok(()),
        }
    }
}

/// Controller timing
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    /// Consecutive failed stats reads after which the session is torn down
    pub max_consecutive_poll_failures: u32,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_consecutive_poll_failures: 5,
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

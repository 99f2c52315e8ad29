use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    /// How long a tab gets to answer a frame request. Kept below the hub's
    /// own frame timeout so a silent tab resolves to "no frame" first.
    pub frame_timeout_ms: u64,
    pub command_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9876,
            frame_timeout_ms: 1_500,
            command_capacity: 16,
        }
    }
}

impl BridgeConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable policy for one-shot reads and streams.
///
/// Defaults follow the platform plugins this crate fronts: a 2 second window
/// for one-shot reads, a relaxed one-shot sample rate, and game-grade
/// (~60 Hz) streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// How long a one-shot read waits for its first sample before failing.
    #[serde(default = "default_one_shot_timeout_ms")]
    pub one_shot_timeout_ms: u64,

    /// Sample interval requested for temporary one-shot listeners.
    #[serde(default = "default_one_shot_interval_ms")]
    pub one_shot_interval_ms: u64,

    /// Sample interval requested for persistent stream listeners.
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,

    /// Capacity of per-subscriber delivery channels; overflow drops samples.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_one_shot_timeout_ms() -> u64 {
    2000
}

fn default_one_shot_interval_ms() -> u64 {
    100
}

fn default_stream_interval_ms() -> u64 {
    16
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            one_shot_timeout_ms: default_one_shot_timeout_ms(),
            one_shot_interval_ms: default_one_shot_interval_ms(),
            stream_interval_ms: default_stream_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MotionConfig {
    pub fn one_shot_timeout(&self) -> Duration {
        Duration::from_millis(self.one_shot_timeout_ms)
    }

    pub fn one_shot_interval(&self) -> Duration {
        Duration::from_millis(self.one_shot_interval_ms)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }
}

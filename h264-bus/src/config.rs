use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// What the graph's sink queue does when `max_buffers` outputs are already waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Discard the oldest queued output and keep going. Lossy, never stalls the codec.
    #[default]
    DropOldest,
    /// Make the codec stage wait for room. Loss-free.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// "libx264" by default; any ffmpeg H.264 encoder name works.
    pub codec: String,
    /// "ultrafast", "medium", etc.
    pub preset: Option<String>,
    /// "zerolatency", "film", etc.
    pub tune: Option<String>,
    pub frame_rate: u32,
    pub keyframe_interval: u32,
    /// bps, None = codec default
    pub bitrate: Option<u64>,
    /// Try nvenc/vaapi/qsv/v4l2m2m (and cuvid/qsv decoders) before software codecs.
    pub hardware: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: Some("ultrafast".to_string()),
            tune: Some("zerolatency".to_string()),
            frame_rate: 25,
            keyframe_interval: 25,
            bitrate: None,
            hardware: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Outputs allowed to wait between the codec stage and the sink callback.
    pub max_buffers: usize,
    pub drop_policy: DropPolicy,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            max_buffers: 64,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub encoder: EncoderSettings,
    pub sink: SinkSettings,
    /// Upper bound on the wait for a terminal event. None waits forever.
    pub timeout_ms: Option<u64>,
}

impl Settings {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid settings: {}", e))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read settings {}: {}", path.display(), e))?;
        Self::from_json(&json)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.sink.drop_policy = policy;
        self
    }

    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.sink.max_buffers = max_buffers;
        self
    }
}

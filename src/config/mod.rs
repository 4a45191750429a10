//! Player configuration and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stream::frame::DEFAULT_MAX_FRAME_BYTES;
use paths::get_data_dir;

/// speech_player.json shape (camelCase, written by the host application).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerConfig {
    /// Primary streaming synthesis endpoint.
    pub tts_endpoint: String,
    pub auth_token: Option<String>,
    pub voice: Option<String>,
    /// Deadline for connect + response headers. 0 = no deadline.
    pub fetch_timeout_ms: u64,
    pub max_frame_bytes: usize,
    /// 0 = unbounded.
    pub max_concurrent_decodes: usize,
    /// 0 = no per-frame deadline.
    pub decode_timeout_ms: u64,
    /// Tier names in escalation order: "streamelements", "google-translate".
    pub fallback_tiers: Vec<String>,
    pub auto_escalate: bool,
    pub fallback_voice: String,
    pub fallback_language: String,
    pub volume: f32,
    /// Output device name; system default when unset.
    pub output_device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tts_endpoint: "http://localhost:5001/api/ai/tts".into(),
            auth_token: None,
            voice: None,
            fetch_timeout_ms: 15_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_concurrent_decodes: 8,
            decode_timeout_ms: 10_000,
            fallback_tiers: vec!["streamelements".into()],
            auto_escalate: false,
            fallback_voice: "Brian".into(),
            fallback_language: "en".into(),
            volume: 1.0,
            output_device: None,
        }
    }
}

impl PlayerConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }

    pub fn decode_timeout(&self) -> Option<Duration> {
        (self.decode_timeout_ms > 0).then(|| Duration::from_millis(self.decode_timeout_ms))
    }

    pub fn decode_limit(&self) -> Option<usize> {
        (self.max_concurrent_decodes > 0).then_some(self.max_concurrent_decodes)
    }
}

/// Read speech_player.json from the data directory.
pub fn read_player_config() -> PlayerConfig {
    read_player_config_from(&get_config_path())
}

/// Read a player config from `path`, falling back to defaults.
pub fn read_player_config_from(path: &Path) -> PlayerConfig {
    read_json_file(path).unwrap_or_default()
}

/// Path to speech_player.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("speech_player.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

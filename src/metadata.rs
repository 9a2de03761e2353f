//! Header-level technical metadata for all-rows reports. Read from the
//! container headers only; nothing is decoded.

use std::path::{Path, PathBuf};

use lofty::prelude::*;
use lofty::probe::Probe;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-file technical columns; any field the container does not expose stays `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMetadata {
    pub duration_seconds: Option<f64>,
    pub bit_rate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub channels: Option<u8>,
    pub file_size_bytes: Option<u64>,
}

impl TechnicalMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Read metadata synchronously. Unreadable or unrecognized files yield
/// whatever could be gathered (at least the size, when the file exists).
pub fn read_metadata(path: &Path) -> TechnicalMetadata {
    let mut metadata = TechnicalMetadata {
        file_size_bytes: std::fs::metadata(path).ok().map(|m| m.len()),
        ..TechnicalMetadata::default()
    };

    let tagged = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged) => tagged,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no technical metadata");
            return metadata;
        }
    };

    let properties = tagged.properties();
    let duration = properties.duration();
    if !duration.is_zero() {
        // Millisecond precision is plenty for a report column
        metadata.duration_seconds = Some((duration.as_millis() as f64) / 1000.0);
    }
    metadata.bit_rate_kbps = properties.audio_bitrate();
    metadata.sample_rate_hz = properties.sample_rate();
    metadata.channels = properties.channels();
    metadata
}

/// Read metadata on the blocking pool
pub async fn read_metadata_blocking(path: PathBuf) -> TechnicalMetadata {
    tokio::task::spawn_blocking(move || read_metadata(&path))
        .await
        .unwrap_or_default()
}

//! Streaming configuration.

use super::sink::SinkKind;
use crate::error::{Result, TapError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const SINK_TYPE_KEY: &str = "streamer.sinkType";
pub const WRITE_DIR_PATH_KEY: &str = "streamer.writeDirPath";
pub const CHANNEL_CAPACITY_KEY: &str = "streamer.channelCapacity";
pub const TCP_ADDRESS_KEY: &str = "streamer.tcpAddress";
pub const CLOSE_TIMEOUT_KEY: &str = "streamer.closeTimeoutMs";

/// Default capacity of each per-path aggregation queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Default time `close` waits for queued frames to drain, in milliseconds.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;

/// Source of application options.
pub trait AppOptions {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
}

/// Looks `key` up as a flat key first, then as a dotted path into
/// nested objects.
impl AppOptions for serde_json::Value {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.as_object().and_then(|o| o.get(key)) {
            return Some(value.clone());
        }
        key.split('.')
            .try_fold(self, |node, segment| node.as_object()?.get(segment))
            .cloned()
    }
}

impl AppOptions for HashMap<String, serde_json::Value> {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        HashMap::get(self, key).cloned()
    }
}

/// Streaming service configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StreamerConfig {
    /// Sink type used by `create_destination`.
    /// Default: "file"
    pub sink_type: String,

    /// Directory holding one file per path (file sinks).
    pub write_dir_path: Option<PathBuf>,

    /// Capacity of each per-path aggregation queue.
    /// Default: 1000
    pub channel_capacity: usize,

    /// `host:port` to connect to (tcp sinks).
    pub tcp_address: Option<String>,

    /// How long `close` lets queued frames drain before interrupting
    /// stalled sinks, in milliseconds.
    /// Default: 1000
    pub close_timeout_ms: u64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            sink_type: SinkKind::File.as_str().to_string(),
            write_dir_path: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tcp_address: None,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl StreamerConfig {
    /// Load and validate the `streamer.*` options.
    pub fn from_options(opts: &dyn AppOptions) -> Result<Self> {
        let mut fields = serde_json::Map::new();
        for (field, key) in [
            ("sinkType", SINK_TYPE_KEY),
            ("writeDirPath", WRITE_DIR_PATH_KEY),
            ("channelCapacity", CHANNEL_CAPACITY_KEY),
            ("tcpAddress", TCP_ADDRESS_KEY),
            ("closeTimeoutMs", CLOSE_TIMEOUT_KEY),
        ] {
            if let Some(value) = opts.get(key) {
                fields.insert(field.to_string(), value);
            }
        }

        let config: StreamerConfig = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| TapError::Config(format!("invalid streamer options: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Drain deadline used by `close`.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Check that the selected sink type has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(TapError::Config(
                "channelCapacity must be greater than zero".into(),
            ));
        }

        match self.sink_type.parse::<SinkKind>()? {
            SinkKind::File => {
                let dir = self.write_dir_path.as_ref().ok_or_else(|| {
                    TapError::Config(format!("{} is required for file sinks", WRITE_DIR_PATH_KEY))
                })?;
                if !dir.is_dir() {
                    return Err(TapError::Config(format!(
                        "write directory {} does not exist",
                        dir.display()
                    )));
                }
            }
            SinkKind::Tcp => {
                if self.tcp_address.is_none() {
                    return Err(TapError::Config(format!(
                        "{} is required for tcp sinks",
                        TCP_ADDRESS_KEY
                    )));
                }
            }
            SinkKind::Memory => {}
        }
        Ok(())
    }
}

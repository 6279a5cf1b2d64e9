use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::messenger::DEFAULT_CHANNEL;

/// Largest frame the bridge accepts unless configured otherwise (16 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Smallest frame limit that still fits a minimal frame
const MIN_FRAME_LEN: usize = 16;

/// Socket file name used when no path is configured
const DEFAULT_SOCKET_NAME: &str = "tether.sock";

/// Configuration for exposing a channel over a Unix domain socket
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    socket_path: PathBuf,
    channel: String,
    max_frame_len: usize,
    reply_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join(DEFAULT_SOCKET_NAME),
            channel: DEFAULT_CHANNEL.to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reply_timeout: None,
        }
    }
}

impl BridgeConfig {
    /// Create a new builder for BridgeConfig
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Channel the bridge binds incoming clients to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// How long a remote client waits for a reply; `None` waits forever
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    inner: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.inner.socket_path = path.as_ref().to_path_buf();
        self
    }

    pub fn channel(mut self, name: impl Into<String>) -> Self {
        self.inner.channel = name.into();
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.inner.max_frame_len = len;
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.inner.reply_timeout = Some(timeout);
        self
    }

    pub fn no_reply_timeout(mut self) -> Self {
        self.inner.reply_timeout = None;
        self
    }

    pub fn build(self) -> Result<BridgeConfig> {
        let config = self.inner;
        if config.channel.is_empty() {
            return Err(Error::Config("channel name must not be empty".to_string()));
        }
        if config.socket_path.as_os_str().is_empty() {
            return Err(Error::Config("socket path must not be empty".to_string()));
        }
        if config.max_frame_len < MIN_FRAME_LEN {
            return Err(Error::Config(format!(
                "max frame length must be at least {MIN_FRAME_LEN} bytes, got {}",
                config.max_frame_len
            )));
        }
        if config.reply_timeout == Some(Duration::ZERO) {
            return Err(Error::Config("reply timeout must be non-zero".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::builder().build().unwrap();
        assert_eq!(config.channel(), DEFAULT_CHANNEL);
        assert_eq!(config.max_frame_len(), DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.reply_timeout(), None);
        assert!(config.socket_path().ends_with(DEFAULT_SOCKET_NAME));
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::builder()
            .socket_path("/tmp/custom.sock")
            .channel("channel-x")
            .max_frame_len(1024)
            .reply_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.socket_path(), Path::new("/tmp/custom.sock"));
        assert_eq!(config.channel(), "channel-x");
        assert_eq!(config.max_frame_len(), 1024);
        assert_eq!(config.reply_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            BridgeConfig::builder().channel("").build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::builder().max_frame_len(4).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::builder().reply_timeout(Duration::ZERO).build(),
            Err(Error::Config(_))
        ));
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use tether::BridgeConfig;

use crate::cli::BridgeArgs;

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Channel settings
    pub channel: ChannelSection,

    /// Bridge socket settings
    pub bridge: BridgeSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub socket: Option<PathBuf>,
    pub max_frame_len: Option<usize>,
    pub reply_timeout_ms: Option<u64>,
}

/// Load config from file
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}

/// Command-line values that override the file
#[derive(Default)]
pub struct Overrides<'a> {
    pub channel: Option<&'a str>,
    pub reply_timeout: Option<Duration>,
}

/// Merge file config with CLI args (CLI takes precedence)
pub fn merge_config(
    file: FileConfig,
    bridge: &BridgeArgs,
    overrides: Overrides<'_>,
) -> Result<BridgeConfig> {
    let mut builder = BridgeConfig::builder();

    // Channel: CLI > file > default
    if let Some(name) = overrides.channel.map(str::to_string).or(file.channel.name) {
        builder = builder.channel(name);
    }

    if let Some(path) = bridge.socket.clone().or(file.bridge.socket) {
        builder = builder.socket_path(path);
    }

    if let Some(len) = bridge.max_frame_len.or(file.bridge.max_frame_len) {
        builder = builder.max_frame_len(len);
    }

    let reply_timeout = overrides
        .reply_timeout
        .or(file.bridge.reply_timeout_ms.map(Duration::from_millis));
    if let Some(timeout) = reply_timeout {
        builder = builder.reply_timeout(timeout);
    }

    builder.build().context("invalid bridge configuration")
}

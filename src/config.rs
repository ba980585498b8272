//! Watcher configuration from environment variables.

use anyhow::{bail, Result};
use archive_client::ChannelConfig;
use archive_shared::GroupId;

/// Everything the watcher needs to open a session.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub channel: ChannelConfig,
    pub token: String,
    pub monitored: Vec<GroupId>,
}

impl WatchSettings {
    /// Environment variables:
    /// - `ARCHIVE_TOKEN`: session credential (required)
    /// - `ARCHIVE_MONITORED_GROUPS`: comma-separated group ids (default: none)
    /// - `ARCHIVE_WS_*`: see [`ChannelConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("ARCHIVE_TOKEN").unwrap_or_default();
        if token.trim().is_empty() {
            bail!("ARCHIVE_TOKEN must be set to a dashboard session token");
        }

        let monitored = std::env::var("ARCHIVE_MONITORED_GROUPS")
            .map(|list| parse_group_list(&list))
            .unwrap_or_default();

        Ok(Self {
            channel: ChannelConfig::from_env(),
            token: token.trim().to_string(),
            monitored,
        })
    }
}

/// Split a comma-separated list, dropping blanks and duplicates.
pub fn parse_group_list(list: &str) -> Vec<GroupId> {
    let mut groups: Vec<GroupId> = Vec::new();
    for id in list.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !groups.iter().any(|g| g.as_str() == id) {
            groups.push(GroupId::from(id));
        }
    }
    groups
}

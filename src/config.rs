use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TURN_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8080/signaling";

const ENV_TURN_API_URL: &str = "TURN_API_URL";
const ENV_SIGNALING_URL: &str = "SIGNALING_URL";
const ENV_USER_ID: &str = "WEBRTCKIT_USER_ID";
const ENV_STATS_INTERVAL_MS: &str = "WEBRTCKIT_STATS_INTERVAL_MS";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KitConfig {
    /// Identity of the local user in signaling messages.
    pub user_id: String,
    pub signaling_url: String,
    pub turn_api_url: String,
    pub turn_request_timeout_ms: u64,
    pub turn_max_retries: u32,
    pub stats_interval_ms: u64,
    pub background_timeout_secs: u64,
    pub enable_local_capture: bool,
    /// Hand connection drops to the reconnection manager instead of ending
    /// the call.
    pub auto_reconnect: bool,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            turn_api_url: DEFAULT_TURN_API_URL.to_string(),
            turn_request_timeout_ms: 10_000,
            turn_max_retries: 3,
            stats_interval_ms: 1_000,
            background_timeout_secs: 5 * 60,
            enable_local_capture: true,
            auto_reconnect: false,
        }
    }
}

impl KitConfig {
    /// Defaults overridden by whichever environment variables are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_TURN_API_URL).filter(|v| !v.is_empty()) {
            self.turn_api_url = url;
        }
        if let Some(url) = lookup(ENV_SIGNALING_URL).filter(|v| !v.is_empty()) {
            self.signaling_url = url;
        }
        if let Some(user) = lookup(ENV_USER_ID).filter(|v| !v.is_empty()) {
            self.user_id = user;
        }
        match lookup(ENV_STATS_INTERVAL_MS).map(|v| v.parse::<u64>()) {
            Some(Ok(ms)) if ms > 0 => self.stats_interval_ms = ms,
            Some(_) => log::warn!("Ignoring invalid {ENV_STATS_INTERVAL_MS}"),
            None => {}
        }
        self
    }

    pub fn turn_request_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_request_timeout_ms)
    }

    /// Zero falls back to the default interval.
    pub fn stats_interval(&self) -> Duration {
        match self.stats_interval_ms {
            0 => crate::stats::DEFAULT_STATS_INTERVAL,
            ms => Duration::from_millis(ms),
        }
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = KitConfig::default();
        assert_eq!(config.turn_api_url, "http://localhost:8080/api");
        assert_eq!(config.turn_request_timeout(), Duration::from_secs(10));
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
        assert_eq!(config.background_timeout(), Duration::from_secs(300));
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TURN_API_URL", "https://turn.example.org/api"),
            ("WEBRTCKIT_USER_ID", "alice"),
            ("WEBRTCKIT_STATS_INTERVAL_MS", "250"),
        ]
        .into_iter()
        .collect();
        let config =
            KitConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.turn_api_url, "https://turn.example.org/api");
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.stats_interval_ms, 250);
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
    }

    #[test]
    fn test_invalid_interval_keeps_default() {
        let config = KitConfig::default().with_overrides(|k| {
            (k == "WEBRTCKIT_STATS_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.stats_interval_ms, 1_000);
    }

    #[test]
    fn test_zero_interval_from_file_uses_default() {
        let config: KitConfig = serde_json::from_str(r#"{"statsIntervalMs":0}"#).unwrap();
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: KitConfig =
            serde_json::from_str(r#"{"userId":"bob","autoReconnect":true}"#).unwrap();
        assert_eq!(config.user_id, "bob");
        assert!(config.auto_reconnect);
        assert_eq!(config.turn_max_retries, 3);
    }
}

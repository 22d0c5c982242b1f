//! Notification sink boundary.
//!
//! Delivery is delegated to the external `apprise` CLI, which fans a
//! message out to any number of URL-addressed services. The trait
//! keeps the worker testable without a network.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::message::Message;

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Apprise-style sink URLs. Empty list disables delivery.
    pub urls: Vec<String>,
    /// Default title applied to untitled messages.
    pub title: Option<String>,
    /// Avatar image for sinks that support one (discord, slack).
    pub avatar_url: Option<String>,
    pub send_timeout_s: u64,
    pub retry_interval_s: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            title: None,
            avatar_url: None,
            send_timeout_s: 10,
            retry_interval_s: 5,
        }
    }
}

impl NotifyConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_s)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_s)
    }
}

/// One delivery attempt for one message. `true` means every configured
/// sink acknowledged within the timeout.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send(&self, msg: &Message) -> bool;
}

/// Sink invoking the external `apprise` binary.
pub struct AppriseSink {
    apprise_bin: String,
    urls: Vec<String>,
    default_title: Option<String>,
    send_timeout: Duration,
}

impl AppriseSink {
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        let urls = cfg
            .urls
            .iter()
            .map(|url| decorate_url(url, cfg.avatar_url.as_deref()))
            .collect();
        Self {
            apprise_bin: "apprise".to_string(),
            urls,
            default_title: cfg.title.clone(),
            send_timeout: cfg.send_timeout(),
        }
    }

    #[must_use]
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.apprise_bin = bin.into();
        self
    }

    fn args_for(&self, msg: &Message) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(title) = msg.title.as_deref().or(self.default_title.as_deref()) {
            args.push("-t".to_string());
            args.push(title.to_string());
        }
        args.push("-b".to_string());
        args.push(msg.body.clone());
        args.extend(self.urls.iter().cloned());
        args
    }
}

#[async_trait]
impl NotifySink for AppriseSink {
    async fn send(&self, msg: &Message) -> bool {
        if self.urls.is_empty() {
            return true;
        }

        let mut cmd = Command::new(&self.apprise_bin);
        cmd.args(self.args_for(msg));

        match tokio::time::timeout(self.send_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(seq = msg.seq, "apprise exited non-zero: {}", stderr.trim());
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(seq = msg.seq, "apprise failed to spawn: {e}");
                false
            }
            Err(_elapsed) => {
                tracing::warn!(
                    seq = msg.seq,
                    "apprise timed out after {}s",
                    self.send_timeout.as_secs()
                );
                false
            }
        }
    }
}

/// Append the avatar to sink URLs whose scheme supports one.
fn decorate_url(url: &str, avatar: Option<&str>) -> String {
    let Some(avatar) = avatar else {
        return url.to_string();
    };
    if !(url.starts_with("discord://") || url.starts_with("slack://")) {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}avatar_url={}", percent_encode(avatar))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::message::Priority;

    fn msg(title: Option<&str>, body: &str) -> Message {
        Message {
            seq: 1,
            priority: Priority::Info,
            title: title.map(String::from),
            body: body.to_string(),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn config_defaults() {
        let cfg = NotifyConfig::default();
        assert!(cfg.urls.is_empty());
        assert_eq!(cfg.send_timeout_s, 10);
        assert_eq!(cfg.retry_interval_s, 5);
    }

    #[test]
    fn args_include_body_and_urls() {
        let cfg = NotifyConfig {
            urls: vec!["discord://id/token".to_string(), "mailto://a@b".to_string()],
            ..NotifyConfig::default()
        };
        let sink = AppriseSink::from_config(&cfg);
        let args = sink.args_for(&msg(None, "power lost"));
        assert_eq!(
            args,
            vec!["-b", "power lost", "discord://id/token", "mailto://a@b"]
        );
    }

    #[test]
    fn message_title_overrides_default() {
        let cfg = NotifyConfig {
            urls: vec!["mailto://a@b".to_string()],
            title: Some("UPS Monitor".to_string()),
            ..NotifyConfig::default()
        };
        let sink = AppriseSink::from_config(&cfg);

        let args = sink.args_for(&msg(None, "x"));
        assert_eq!(&args[..2], &["-t", "UPS Monitor"]);

        let args = sink.args_for(&msg(Some("Shutdown"), "x"));
        assert_eq!(&args[..2], &["-t", "Shutdown"]);
    }

    #[test]
    fn avatar_appended_to_discord_urls_only() {
        let cfg = NotifyConfig {
            urls: vec![
                "discord://id/token".to_string(),
                "mailto://a@b".to_string(),
            ],
            avatar_url: Some("https://example.com/ups.png".to_string()),
            ..NotifyConfig::default()
        };
        let sink = AppriseSink::from_config(&cfg);
        assert_eq!(
            sink.urls[0],
            "discord://id/token?avatar_url=https%3A%2F%2Fexample.com%2Fups.png"
        );
        assert_eq!(sink.urls[1], "mailto://a@b");
    }

    #[test]
    fn avatar_respects_existing_query() {
        let decorated = decorate_url(
            "discord://id/token?format=markdown",
            Some("https://e.com/a.png"),
        );
        assert!(decorated.starts_with("discord://id/token?format=markdown&avatar_url="));
    }

    #[tokio::test]
    async fn empty_urls_deliver_trivially() {
        let sink = AppriseSink::from_config(&NotifyConfig::default());
        assert!(sink.send(&msg(None, "x")).await);
    }

    #[tokio::test]
    async fn missing_binary_reports_failure() {
        let cfg = NotifyConfig {
            urls: vec!["mailto://a@b".to_string()],
            ..NotifyConfig::default()
        };
        let sink = AppriseSink::from_config(&cfg).with_binary("/nonexistent/apprise-test");
        assert!(!sink.send(&msg(None, "x")).await);
    }
}

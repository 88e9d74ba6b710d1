// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 满员通知 (Notification sink)

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use tracing::info;

use crate::config::NotifySettings;

/// 通知接口
pub trait Notifier: Send {
    fn notify(&self, text: &str) -> Result<()>;
}

/// 满员通知正文
pub fn capacity_alert_text(
    camera: &str,
    occupancy: u64,
    threshold: u64,
    at: DateTime<Local>,
) -> String {
    format!(
        "🚨 VENUE AT CAPACITY - STOP ADMISSION\nCamera: {}\nCurrent: {} | Limit: {}\nTime: {}",
        camera,
        occupancy,
        threshold,
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[derive(Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot sendMessage
pub struct TelegramNotifier {
    agent: ureq::Agent,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str, chat_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            chat_id: chat_id.into(),
        }
    }

    /// Token 和 chat id 都配置了才启用
    pub fn from_settings(settings: &NotifySettings) -> Option<Self> {
        let token = settings.telegram_token.as_deref().filter(|t| !t.is_empty())?;
        let chat_id = settings.telegram_chat_id.as_deref().filter(|c| !c.is_empty())?;
        Some(Self::new(
            &settings.api_base,
            token,
            chat_id,
            Duration::from_millis(settings.timeout_ms),
        ))
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: &str) -> Result<()> {
        let reply: TelegramReply = self
            .agent
            .post(&self.endpoint)
            .send_json(serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .context("telegram sendMessage")?
            .into_json()
            .context("decode telegram reply")?;
        if !reply.ok {
            bail!(
                "telegram rejected message: {}",
                reply.description.unwrap_or_default()
            );
        }
        info!("📨 通知已发送 (chat {})", self.chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn alert_text_carries_counts() {
        let at = Local.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        let text = capacity_alert_text("gate-a", 31, 30, at);
        assert!(text.contains("Camera: gate-a"));
        assert!(text.contains("Current: 31 | Limit: 30"));
        assert!(text.ends_with("2026-03-01 18:30:00"));
    }

    #[test]
    fn disabled_without_credentials() {
        let mut settings = NotifySettings::default();
        assert!(TelegramNotifier::from_settings(&settings).is_none());
        settings.telegram_token = Some("123:abc".into());
        assert!(TelegramNotifier::from_settings(&settings).is_none());
        settings.telegram_chat_id = Some("42".into());
        let notifier = TelegramNotifier::from_settings(&settings).unwrap();
        assert_eq!(notifier.endpoint, "https://api.telegram.org/bot123:abc/sendMessage");
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{NotifyError, Notifier};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends messages to one Telegram chat through a bot.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn url(&self) -> String {
        format!("{TELEGRAM_API}/bot{}/sendMessage", self.token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: message,
        };
        let response = self.client.post(self.url()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[test]
fn url_embeds_token() {
    let notifier = TelegramNotifier::new("123:abc", "42").unwrap();
    assert_eq!(notifier.url(), "https://api.telegram.org/bot123:abc/sendMessage");
}

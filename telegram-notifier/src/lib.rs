use async_trait::async_trait;
use monitor_core::{CoreError, Notifier};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, info};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

fn send_message_url(token: &str) -> String {
    format!("{TELEGRAM_API_BASE}/bot{token}/sendMessage")
}

/// Sends formatted messages to a single Telegram chat via the Bot API.
///
/// A non-200 reply is logged with its status and body and then dropped;
/// only transport failures surface as errors. There is no retry either
/// way, a message that does not go out the first time is gone.
#[derive(Debug)]
pub struct TelegramNotifier {
    http_client: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<(), CoreError> {
        let form = [
            ("chat_id", self.chat_id.as_str()),
            ("text", text),
            ("parse_mode", "Markdown"),
        ];

        let response = self
            .http_client
            .post(send_message_url(&self.token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = if status == StatusCode::OK {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        handle_send_status(status, &body, &self.chat_id)
    }
}

/// Log the outcome of a send. A non-200 reply is a dropped message, not an
/// error: it is logged with its status and body and the dispatcher still
/// reports success to the caller.
fn handle_send_status(status: StatusCode, body: &str, chat_id: &str) -> Result<(), CoreError> {
    if status == StatusCode::OK {
        info!("Telegram message delivered to chat {}", chat_id);
    } else {
        error!(
            "Telegram send failed with status {}, response: {}",
            status, body
        );
    }
    Ok(())
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), CoreError> {
        self.send_message(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_url_format() {
        assert_eq!(
            send_message_url("123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn non_200_replies_do_not_raise() {
        assert!(handle_send_status(
            StatusCode::BAD_REQUEST,
            r#"{"ok":false,"description":"Bad Request: chat not found"}"#,
            "42"
        )
        .is_ok());
        assert!(handle_send_status(StatusCode::INTERNAL_SERVER_ERROR, "", "42").is_ok());
        assert!(handle_send_status(StatusCode::OK, "", "42").is_ok());
    }

    #[test]
    fn notifier_construction() {
        let notifier = TelegramNotifier::new("123:abc", "-100200300").unwrap();
        assert_eq!(notifier.chat_id, "-100200300");
        assert_eq!(notifier.token, "123:abc");
    }
}

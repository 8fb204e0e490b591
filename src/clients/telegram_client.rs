//! Telegram Bot API 客户端
//!
//! 发出：带内联键盘的评分通知
//! 收取：长轮询 updates，callback data 里是审核人的决定

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::NotificationError;
use crate::services::{ActionEvent, Notifier, QuickAction};

/// `getUpdates` 服务端等待时间
pub const LONG_POLL_SECS: u64 = 30;

const GRADE_BUTTONS_PER_ROW: usize = 2;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// 等级按钮每行两个，其余按钮各占一行
pub fn inline_keyboard(actions: &[QuickAction]) -> Vec<Vec<InlineButton>> {
    let button = |a: &QuickAction| InlineButton {
        text: a.label.clone(),
        callback_data: a.event.encode(),
    };

    let (grades, others): (Vec<&QuickAction>, Vec<&QuickAction>) = actions
        .iter()
        .partition(|a| matches!(a.event, ActionEvent::GradeSelected { .. }));

    let mut rows: Vec<Vec<InlineButton>> = grades
        .chunks(GRADE_BUTTONS_PER_ROW)
        .map(|row| row.iter().map(|a| button(*a)).collect())
        .collect();
    rows.extend(others.into_iter().map(|a| vec![button(a)]));
    rows
}

pub struct TelegramClient {
    client: Client,
    /// `<api base>/bot<token>`
    bot_url: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self, NotificationError> {
        // 必须比长轮询更长
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
            .build()?;
        Ok(Self {
            client,
            bot_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, NotificationError> {
        Self::new(&config.telegram_api_base, &config.telegram_bot_token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, NotificationError> {
        let url = format!("{}/{}", self.bot_url, method);
        let response: ApiResponse<T> = self.client.post(&url).json(&body).send().await?.json().await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(NotificationError::Rejected {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    /// 不带按钮的 HTML 消息
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), NotificationError> {
        let _: Message = self
            .call(
                "sendMessage",
                json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" }),
            )
            .await?;
        Ok(())
    }

    /// 取 `offset` 之后的 updates，最多等待 `timeout_secs`
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, NotificationError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// 给按下按钮的审核人显示 `text`
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_query_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    /// 移除内联键盘，防止重复决定
    pub async fn clear_keyboard(&self, chat_id: i64, message_id: i64) -> Result<(), NotificationError> {
        let _: serde_json::Value = self
            .call(
                "editMessageReplyMarkup",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "reply_markup": { "inline_keyboard": [] },
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_interactive_message(
        &self,
        recipient: i64,
        text: &str,
        actions: &[QuickAction],
    ) -> Result<(), NotificationError> {
        let keyboard = inline_keyboard(actions);
        let sent: Message = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": recipient,
                    "text": text,
                    "parse_mode": "HTML",
                    "reply_markup": { "inline_keyboard": keyboard },
                }),
            )
            .await?;
        debug!("消息 {} 已发到聊天 {}", sent.message_id, recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RubricGrade;
    use crate::services::quick_actions;

    fn grades(n: i64) -> Vec<RubricGrade> {
        (1..=n)
            .map(|i| RubricGrade {
                id: i as u64,
                assignment_id: 1,
                grade_number: i,
                short_description: format!("Tier {}", i),
                detailed_description: None,
            })
            .collect()
    }

    #[test]
    fn grade_buttons_pair_up_with_regenerate_last() {
        let rows = inline_keyboard(&quick_actions(9, &grades(3)));

        let shape: Vec<usize> = rows.iter().map(Vec::len).collect();
        assert_eq!(shape, vec![2, 1, 1]);
        assert_eq!(rows[0][0].callback_data, "grade_9_1");
        assert_eq!(rows[1][0].callback_data, "grade_9_3");
        assert_eq!(rows[2][0].text, "🔄 Regenerate");
        assert_eq!(rows[2][0].callback_data, "regen_9");
    }

    #[test]
    fn no_rubric_still_offers_regenerate() {
        let rows = inline_keyboard(&quick_actions(4, &[]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].callback_data, "regen_4");
    }

    #[test]
    fn decodes_callback_update() {
        let payload = r#"{
            "ok": true,
            "result": [{
                "update_id": 501,
                "callback_query": {
                    "id": "cb1",
                    "from": { "id": 42, "first_name": "Rae" },
                    "message": { "message_id": 8, "chat": { "id": 42 } },
                    "data": "grade_17_2"
                }
            }]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(payload).unwrap();
        assert!(response.ok);
        let updates = response.result.unwrap();
        let query = updates[0].callback_query.as_ref().unwrap();
        assert_eq!(query.data.as_deref(), Some("grade_17_2"));
        assert_eq!(query.message.as_ref().unwrap().chat.id, 42);
    }

    #[test]
    fn error_envelope_has_description() {
        let payload = r#"{ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" }"#;
        let response: ApiResponse<Message> = serde_json::from_str(payload).unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.description.as_deref(), Some("Bad Request: chat not found"));
    }
}

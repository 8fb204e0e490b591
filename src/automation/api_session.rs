//! 基于 OpenAI 兼容 API 的聊天会话
//!
//! 与浏览器会话同一契约：输入一个 prompt，返回回复文本

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::automation::ChatSession;
use crate::config::Config;
use crate::error::AutomationError;

pub struct ApiChatSession {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl ApiChatSession {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl ChatSession for ApiChatSession {
    async fn submit_prompt(&mut self, text: &str) -> Result<String, AutomationError> {
        debug!("调用聊天 API，模型: {}", self.model_name);

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()
            .map_err(|e| AutomationError::Backend(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![ChatCompletionRequestMessage::User(user_msg)])
            .temperature(0.3)
            .max_tokens(1024u32)
            .build()
            .map_err(|e| AutomationError::Backend(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("聊天 API 调用失败: {}", e);
            AutomationError::Backend(e.to_string())
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AutomationError::NoResponse);
        }
        Ok(content)
    }
}

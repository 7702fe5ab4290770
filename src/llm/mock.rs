//! Mock LLM 客户端（离线运行与测试，无需 API）
//!
//! 取最后一条 User 消息原样回显。

use async_trait::async_trait;

use crate::llm::{ChatRole, LlmClient, LlmError, Message};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

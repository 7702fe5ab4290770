//! 文本生成协作方抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete：输入有序消息，输出一段补全文本。

use async_trait::async_trait;
use thiserror::Error;

/// 发给生成后端的消息角色（与 Chat API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub role: ChatRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 后端完全不可达（连接失败等），单次分发因此失败
    #[error("generator unreachable: {0}")]
    Unavailable(String),

    /// 请求失败（API 错误、超时、解析失败），分发降级为兜底回复
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("empty completion")]
    Empty,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}

//! LLM 层：文本生成客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{ChatRole, LlmClient, LlmError, Message};

/// 按 [llm].provider 构建客户端；未知 provider 回退到 openai
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(MockLlmClient),
        "openai" => Arc::new(OpenAiClient::from_config(cfg)),
        other => {
            tracing::warn!(provider = %other, "unknown llm provider, using openai");
            Arc::new(OpenAiClient::from_config(cfg))
        }
    }
}

//! 引擎错误分类
//!
//! 每种错误对应不同的降级方式：Validation 变成 failed TaskResult，NotFound 退回对话路径，
//! Timeout 变成 timed_out TaskResult，Persistence 与 Generation 只告警不阻塞回复；
//! 只有协作方（NLU / 生成器）完全不可达时单次分发才失败。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// 缺失或格式错误的实体
    #[error("{0}")]
    Validation(String),

    #[error("No action registered for intent: {0}")]
    NotFound(String),

    #[error("Intent already registered: {0}")]
    DuplicateIntent(String),

    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(std::time::Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Intent classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Text generator unavailable: {0}")]
    GeneratorUnavailable(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// 是否导致本次分发失败（其余错误都在分发内部降级处理）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ClassifierUnavailable(_) | EngineError::GeneratorUnavailable(_)
        )
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(e: ::config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<crate::memory::PersistenceError> for EngineError {
    fn from(e: crate::memory::PersistenceError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

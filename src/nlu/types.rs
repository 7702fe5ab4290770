//! NLU 协作方契约：IntentResult 与 IntentClassifier
//!
//! 实体在通过 ActionSpec 校验前一律视为无类型的 key → JSON 值（字符串、数字或列表）。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Entities = HashMap<String, Value>;

/// 单条输入的意图识别结果；只被消费一次，仅 intent 会写入 Turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    #[serde(default)]
    pub entities: Entities,
    /// [0, 1]
    pub confidence: f32,
}

impl IntentResult {
    pub fn new(intent: impl Into<String>, entities: Entities, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            intent: intent.into(),
            entities,
            confidence,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_INTENT, Entities::new(), 0.0)
    }
}

pub const UNKNOWN_INTENT: &str = "unknown_intent";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NluError {
    /// 模型未加载 / 服务不可达
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classification failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<IntentResult, NluError>;
}

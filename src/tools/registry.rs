//! 动作注册表
//!
//! 启动时把 intent → ActionSpec（处理器 + 必需实体 + 超时 + 幂等标记）注册进来，之后只读；
//! 共享时包在 Arc 里，读路径无锁。是否允许自动触发（actionable）由配置单独给出，
//! 与「有没有处理器」是两回事。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::EngineError;
use crate::nlu::Entities;
use crate::tools::ProcessTool;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 进程内能力：直接调用，Err 会被映射为 failed TaskResult
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, entities: &Entities) -> Result<String, String>;
}

/// 处理器的两种形态
#[derive(Clone)]
pub enum Handler {
    InProcess(Arc<dyn Capability>),
    /// 独立子进程，参数只由校验过的实体构造
    Process(ProcessTool),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::InProcess(c) => f.debug_tuple("InProcess").field(&c.name()).finish(),
            Handler::Process(p) => f.debug_tuple("Process").field(p).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub intent: String,
    pub required_entities: BTreeSet<String>,
    pub handler: Handler,
    pub timeout: Duration,
    /// 只有显式标记幂等的动作才会自动重试
    pub idempotent: bool,
}

impl ActionSpec {
    pub fn new(intent: impl Into<String>, handler: Handler) -> Self {
        Self {
            intent: intent.into(),
            required_entities: BTreeSet::new(),
            handler,
            timeout: DEFAULT_TIMEOUT,
            idempotent: false,
        }
    }

    pub fn in_process(intent: impl Into<String>, capability: impl Capability + 'static) -> Self {
        Self::new(intent, Handler::InProcess(Arc::new(capability)))
    }

    pub fn process(intent: impl Into<String>, tool: ProcessTool) -> Self {
        Self::new(intent, Handler::Process(tool))
    }

    pub fn require(mut self, entity: impl Into<String>) -> Self {
        self.required_entities.insert(entity.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

#[derive(Default)]
pub struct ActionRegistry {
    specs: HashMap<String, Arc<ActionSpec>>,
    actionable: HashSet<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ActionSpec) -> Result<(), EngineError> {
        if self.specs.contains_key(&spec.intent) {
            return Err(EngineError::DuplicateIntent(spec.intent));
        }
        tracing::debug!(intent = %spec.intent, handler = ?spec.handler, "action registered");
        self.specs.insert(spec.intent.clone(), Arc::new(spec));
        Ok(())
    }

    /// 设置允许自动触发的意图（覆盖之前的集合）；未注册的意图会被记录告警但保留
    pub fn set_actionable<I, S>(&mut self, intents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actionable = intents.into_iter().map(Into::into).collect();
        for intent in &self.actionable {
            if !self.specs.contains_key(intent) {
                tracing::warn!(intent = %intent, "actionable intent has no registered handler");
            }
        }
    }

    pub fn resolve(&self, intent: &str) -> Result<Arc<ActionSpec>, EngineError> {
        self.specs
            .get(intent)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(intent.to_string()))
    }

    /// 已注册且被配置为可自动触发
    pub fn is_actionable(&self, intent: &str) -> bool {
        self.specs.contains_key(intent) && self.actionable.contains(intent)
    }

    pub fn intents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.keys().cloned().collect();
        names.sort();
        names
    }
}

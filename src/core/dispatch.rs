//! 分发控制器：每条输入走一遍 Received → Classified → 动作 / 对话 → Responded
//!
//! 协作方（分类器、生成器、Turn 日志）全部注入，便于测试替身。
//! 同一时刻只处理一条输入：gate 保证用户 / 助手 Turn 成对且按顺序写入。
//! 只有分类器或生成器完全不可达时返回 Err，且不写入任何 Turn。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::core::state::{DispatchPhase, PhaseTrace};
use crate::core::EngineError;
use crate::llm::{LlmClient, LlmError, Message};
use crate::memory::{MemoryStore, Role, TurnDraft};
use crate::nlu::{IntentClassifier, IntentResult, NluError};
use crate::tools::{ActionRegistry, ActionSpec, Handler, TaskExecutor, TaskResult, TaskStatus};

pub const GENERATION_FALLBACK: &str =
    "Sorry, I couldn't come up with a reply just now. Please try again.";

/// 分发相关的运行参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 可执行意图需 confidence ≥ 该值才走动作路径
    pub confidence_threshold: f32,
    pub short_term_limit: usize,
    pub system_prompt: String,
}

impl DispatchSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            confidence_threshold: cfg.dispatch.confidence_threshold,
            short_term_limit: cfg.memory.short_term_limit,
            system_prompt: cfg.app.system_prompt.clone(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum DispatchPath {
    Action { intent: String, status: TaskStatus },
    Conversation,
}

/// 一次分发的结果；warnings 里是被降级处理的非致命错误
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reply: String,
    pub intent: String,
    pub path: DispatchPath,
    pub phases: Vec<DispatchPhase>,
    pub warnings: Vec<EngineError>,
}

pub struct DispatchController {
    classifier: Arc<dyn IntentClassifier>,
    generator: Arc<dyn LlmClient>,
    registry: Arc<ActionRegistry>,
    executor: TaskExecutor,
    memory: Arc<MemoryStore>,
    settings: DispatchSettings,
    gate: Mutex<()>,
}

impl DispatchController {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        generator: Arc<dyn LlmClient>,
        registry: Arc<ActionRegistry>,
        executor: TaskExecutor,
        memory: Arc<MemoryStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            classifier,
            generator,
            registry,
            executor,
            memory,
            settings,
            gate: Mutex::new(()),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, utterance: &str) -> Result<DispatchOutcome, EngineError> {
        let _turn = self.gate.lock().await;
        let mut trace = PhaseTrace::default();
        let mut warnings = Vec::new();

        let classified = match self.classifier.classify(utterance).await {
            Ok(r) => r,
            Err(NluError::Unavailable(e)) => {
                tracing::error!(error = %e, "intent classifier unreachable, utterance dropped");
                return Err(EngineError::ClassifierUnavailable(e));
            }
            Err(NluError::Failed(e)) => {
                tracing::warn!(error = %e, "classification failed, treating as unknown intent");
                IntentResult::unknown()
            }
        };
        trace.advance(DispatchPhase::Classified);
        tracing::info!(
            intent = %classified.intent,
            confidence = classified.confidence,
            "utterance classified"
        );

        let mut action = None;
        if self.registry.is_actionable(&classified.intent)
            && classified.confidence >= self.settings.confidence_threshold
        {
            trace.advance(DispatchPhase::ActionPath);
            match self.registry.resolve(&classified.intent) {
                Ok(spec) => action = Some(spec),
                Err(e) => {
                    tracing::warn!(error = %e, "registry drift, falling back to conversation");
                    warnings.push(e);
                }
            }
        }

        let (reply, path) = match action {
            Some(spec) => {
                let result = self.executor.execute(&spec, &classified.entities).await;
                let path = DispatchPath::Action {
                    intent: spec.intent.clone(),
                    status: result.status,
                };
                (acknowledge(&spec, &result), path)
            }
            None => {
                trace.advance(DispatchPhase::ConversationPath);
                let reply = self.converse(utterance, &mut warnings).await?;
                (reply, DispatchPath::Conversation)
            }
        };
        trace.advance(DispatchPhase::Responded);

        let assistant_intent = match &path {
            DispatchPath::Action { intent, .. } => Some(intent.clone()),
            DispatchPath::Conversation => None,
        };
        let drafts = [
            TurnDraft::user(utterance).with_intent(Some(classified.intent.clone())),
            TurnDraft::assistant(reply.clone()).with_intent(assistant_intent),
        ];
        // append 会同步写 Turn 日志，放到阻塞线程池；gate 仍持有，成对写入不会被打断
        let memory = self.memory.clone();
        let appended = tokio::task::spawn_blocking(move || {
            drafts
                .into_iter()
                .filter_map(|draft| memory.append(draft).warning)
                .collect::<Vec<_>>()
        })
        .await;
        match appended {
            Ok(persist_warnings) => warnings.extend(persist_warnings),
            Err(e) => {
                tracing::error!(error = %e, "turn append task failed");
                warnings.push(EngineError::Persistence(e.to_string()));
            }
        }

        Ok(DispatchOutcome {
            reply,
            intent: classified.intent,
            path,
            phases: trace.into_phases(),
            warnings,
        })
    }

    /// 对话路径：system prompt + 短期窗口 + 当前输入
    async fn converse(
        &self,
        utterance: &str,
        warnings: &mut Vec<EngineError>,
    ) -> Result<String, EngineError> {
        let window = self.memory.recent_window(self.settings.short_term_limit);
        let mut messages = Vec::with_capacity(window.len() + 2);
        messages.push(Message::system(&self.settings.system_prompt));
        messages.extend(window.into_iter().map(|turn| match turn.role {
            Role::User => Message::user(turn.text),
            Role::Assistant => Message::assistant(turn.text),
        }));
        messages.push(Message::user(utterance));

        let failure = match self.generator.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) => LlmError::Empty,
            Err(LlmError::Unavailable(e)) => {
                tracing::error!(error = %e, "text generator unreachable, utterance dropped");
                return Err(EngineError::GeneratorUnavailable(e));
            }
            Err(e) => e,
        };
        tracing::warn!(error = %failure, "generation failed, using fallback reply");
        warnings.push(EngineError::Generation(failure.to_string()));
        Ok(GENERATION_FALLBACK.to_string())
    }
}

/// 把 TaskResult 转成给用户的确认文本
fn acknowledge(spec: &ActionSpec, result: &TaskResult) -> String {
    let intent = &spec.intent;
    let error = result.error.as_deref().unwrap_or("unknown error");
    match result.status {
        TaskStatus::Ok if result.output.trim().is_empty() => {
            format!("Done: {intent} completed with no output.")
        }
        TaskStatus::Ok => match spec.handler {
            Handler::Process(_) => format!("Results of {intent}:\n{}", result.output.trim_end()),
            Handler::InProcess(_) => result.output.trim().to_string(),
        },
        TaskStatus::Failed => format!("Error running {intent}: {error}"),
        TaskStatus::TimedOut => format!("Error: {intent} {error} and was stopped."),
    }
}

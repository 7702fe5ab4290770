//! 单次分发的状态机阶段
//!
//! RECEIVED → CLASSIFIED → {ACTION_PATH | CONVERSATION_PATH} → RESPONDED；
//! 每次分发都按顺序记录经过的阶段，任何路径都终止于 Responded。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Received,
    Classified,
    ActionPath,
    ConversationPath,
    Responded,
}

impl DispatchPhase {
    /// 合法的下一阶段（ActionPath 可因注册表漂移退回 ConversationPath）
    pub fn can_advance_to(self, next: DispatchPhase) -> bool {
        use DispatchPhase::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Classified, ActionPath)
                | (Classified, ConversationPath)
                | (ActionPath, ConversationPath)
                | (ActionPath, Responded)
                | (ConversationPath, Responded)
        )
    }
}

/// 记录一次分发经过的阶段
#[derive(Debug, Clone)]
pub struct PhaseTrace {
    phases: Vec<DispatchPhase>,
}

impl Default for PhaseTrace {
    fn default() -> Self {
        Self {
            phases: vec![DispatchPhase::Received],
        }
    }
}

impl PhaseTrace {
    pub fn current(&self) -> DispatchPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(DispatchPhase::Received)
    }

    pub fn advance(&mut self, next: DispatchPhase) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "illegal dispatch transition {current:?} -> {next:?}"
        );
        tracing::debug!(from = ?current, to = ?next, "dispatch phase");
        self.phases.push(next);
    }

    pub fn into_phases(self) -> Vec<DispatchPhase> {
        self.phases
    }
}

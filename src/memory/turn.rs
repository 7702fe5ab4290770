//! 对话记录单元：Turn
//!
//! 一次用户输入或一次助手回复；写入 MemoryStore 后不可变，只会被剪枝删除。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Turn 的说话方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// 已写入日志的 Turn（id 由 MemoryStore 分配，严格递增）
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// 仅保留意图名，实体不落盘
    pub intent: Option<String>,
}

/// 待写入的 Turn：除 id 外的全部字段
#[derive(Clone, Debug)]
pub struct TurnDraft {
    pub role: Role,
    pub text: String,
    pub intent: Option<String>,
    /// None 表示写入时取当前时间
    pub timestamp: Option<DateTime<Utc>>,
}

impl TurnDraft {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            intent: None,
            timestamp: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            intent: None,
            timestamp: None,
        }
    }

    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn into_turn(self, id: u64) -> Turn {
        Turn {
            id,
            role: self.role,
            text: self.text,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            intent: self.intent,
        }
    }
}

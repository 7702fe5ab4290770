//! Mobius - 个人助理的意图分发与任务执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、分发状态机与分发控制器
//! - **integrations**: 邮件 / 日历协作方契约与对应能力
//! - **llm**: 文本生成客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: Turn 日志：短期窗口、按时间剪枝、SQLite 持久化
//! - **nlu**: 意图识别契约与关键词识别器
//! - **observability**: tracing 初始化
//! - **tools**: 动作注册表、任务执行器、外部进程与内置动作

pub mod config;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod nlu;
pub mod observability;
pub mod tools;

pub use crate::core::{DispatchController, DispatchOutcome, EngineError};

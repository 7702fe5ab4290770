//! Mobius - 个人助理命令行入口
//!
//! 加载配置、初始化日志，组装分发控制器与后台剪枝任务，然后逐行读取 stdin 并回复。
//! 用法：mobius [config.toml]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use mobius::config::{load_config, AppConfig, MemorySection};
use mobius::core::{DispatchController, DispatchSettings, EngineError};
use mobius::integrations::Services;
use mobius::llm::create_llm_from_config;
use mobius::memory::{spawn_pruner, MemoryStore, SqliteTurnLog};
use mobius::nlu::KeywordClassifier;
use mobius::tools::{build_registry, TaskExecutor};

/// 打开持久化记忆；数据库不可用时退回纯内存
fn open_memory(cfg: &MemorySection) -> MemoryStore {
    let Some(path) = &cfg.database_path else {
        return MemoryStore::in_memory(cfg.short_term_limit);
    };
    let opened = SqliteTurnLog::open(path).and_then(|log| {
        MemoryStore::open(Arc::new(log), cfg.short_term_limit, cfg.restore_limit)
    });
    match opened {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "turn log unavailable, memory is in-process only");
            MemoryStore::in_memory(cfg.short_term_limit)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (cfg, config_error) = match load_config(config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(EngineError::from(e))),
    };
    mobius::observability::init(&cfg.logging).context("Failed to initialize logging")?;
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "config load failed, using defaults");
    }

    let registry = build_registry(&cfg, Services::default()).context("Failed to build action registry")?;
    let memory = Arc::new(open_memory(&cfg.memory));
    let controller = DispatchController::new(
        Arc::new(KeywordClassifier::new()),
        create_llm_from_config(&cfg.llm),
        Arc::new(registry),
        TaskExecutor::from_config(&cfg.executor),
        memory.clone(),
        DispatchSettings::from_config(&cfg),
    );

    let cancel = CancellationToken::new();
    let pruner = cfg.memory.retention().map(|horizon| {
        spawn_pruner(
            memory.clone(),
            Duration::from_secs(cfg.memory.prune_interval_secs.max(1)),
            horizon,
            cancel.clone(),
        )
    });

    println!("{} is ready. Type 'quit' or 'exit' to leave.", cfg.app.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if matches!(utterance.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        match controller.dispatch(utterance).await {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    tracing::debug!(warning = %warning, "dispatch degraded");
                }
                println!("Assistant: {}", outcome.reply);
            }
            Err(e) => {
                tracing::error!(error = %e, "dispatch failed");
                println!("Assistant: Sorry, an internal error occurred. Please check the logs.");
            }
        }
    }

    cancel.cancel();
    if let Some(handle) = pruner {
        let _ = handle.await;
    }
    println!("Goodbye!");
    Ok(())
}

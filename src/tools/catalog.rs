//! 内置动作目录
//!
//! 启动时按配置构建 ActionRegistry：超时 / 幂等可被 [actions.<intent>] 覆盖，
//! actionable 集合来自 [dispatch].actionable_intents。

use crate::config::AppConfig;
use crate::core::EngineError;
use crate::integrations::{ScheduleMeetingCapability, SendEmailCapability, Services};
use crate::tools::{
    ActionRegistry, ActionSpec, ClockCapability, EntityKind, ProcessTool, WebSearchCapability,
};

pub fn build_registry(cfg: &AppConfig, services: Services) -> Result<ActionRegistry, EngineError> {
    let default_secs = cfg.executor.default_timeout_secs;
    // (spec, 目录默认超时秒数, 目录默认幂等)
    let specs = vec![
        (
            ActionSpec::in_process("get_current_datetime", ClockCapability),
            default_secs,
            true,
        ),
        (
            ActionSpec::in_process("search_web", WebSearchCapability::new(&cfg.tools.search))
                .require("search_query"),
            cfg.tools.search.timeout_secs + 5,
            true,
        ),
        (
            ActionSpec::process(
                "run_whois",
                ProcessTool::new(&cfg.tools.whois_program)
                    .entity_arg("target_address", EntityKind::Host),
            )
            .require("target_address"),
            default_secs,
            true,
        ),
        (
            ActionSpec::process(
                "run_nmap",
                ProcessTool::new(&cfg.tools.nmap_program)
                    .entity_arg("target_address", EntityKind::Host),
            )
            .require("target_address"),
            cfg.tools.nmap_timeout_secs,
            false,
        ),
        (
            ActionSpec::process(
                "open_application",
                ProcessTool::allowlisted("object_name", cfg.tools.applications.clone())
                    .detached(),
            )
            .require("object_name"),
            default_secs,
            false,
        ),
        (
            ActionSpec::in_process("send_email", SendEmailCapability::new(services.mail))
                .require("email_address"),
            default_secs,
            false,
        ),
        (
            ActionSpec::in_process(
                "schedule_meeting",
                ScheduleMeetingCapability::new(services.calendar),
            )
            .require("datetime"),
            default_secs,
            false,
        ),
    ];

    let mut registry = ActionRegistry::new();
    for (spec, timeout_secs, idempotent) in specs {
        let intent = spec.intent.clone();
        registry.register(
            spec.with_timeout(cfg.action_timeout(&intent, timeout_secs))
                .idempotent(cfg.action_idempotent(&intent, idempotent)),
        )?;
    }
    registry.set_actionable(cfg.dispatch.actionable_intents.iter().cloned());
    tracing::info!(intents = ?registry.intents(), "action registry built");
    Ok(registry)
}

//! 任务执行器
//!
//! execute(spec, entities)：先校验必需实体（缺失则不调用处理器），再按处理器形态调用：
//! 进程内能力放进独立 task 并加超时（panic 也映射为 failed），外部工具走 run_process。
//! 幂等动作失败或超时可按指数退避重试；校验失败从不重试。每次调用输出一条 JSON 审计日志。

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ExecutorSection;
use crate::core::EngineError;
use crate::nlu::Entities;
use crate::tools::entities::entity_text;
use crate::tools::process::{run_process, spawn_detached, ProcessStatus, ProcessTool};
use crate::tools::registry::{ActionSpec, Capability, Handler};

const STDERR_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Failed,
    TimedOut,
}

/// 单次调用结果；最终被格式化进助手 Turn 的文本
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub output: String,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Ok,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            status: TaskStatus::TimedOut,
            output: String::new(),
            error: Some(EngineError::Timeout(timeout).to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }
}

/// 一次尝试的结果；validation 为 true 时不可重试
struct Attempt {
    result: TaskResult,
    validation: bool,
}

impl Attempt {
    fn done(result: TaskResult) -> Self {
        Self {
            result,
            validation: false,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            result: TaskResult::failed(error),
            validation: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败后的等待：base * 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct TaskExecutor {
    retry: RetryPolicy,
    max_output_chars: usize,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), 8000)
    }
}

impl TaskExecutor {
    pub fn new(retry: RetryPolicy, max_output_chars: usize) -> Self {
        Self {
            retry,
            max_output_chars,
        }
    }

    pub fn from_config(cfg: &ExecutorSection) -> Self {
        Self::new(
            RetryPolicy {
                max_retries: cfg.max_retries,
                backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            },
            cfg.max_output_chars,
        )
    }

    pub async fn execute(&self, spec: &ActionSpec, entities: &Entities) -> TaskResult {
        let start = Instant::now();
        let max_attempts = if spec.idempotent {
            1 + self.retry.max_retries
        } else {
            1
        };

        let mut attempts = 0;
        let result = if let Some(missing) = spec
            .required_entities
            .iter()
            .find(|name| entity_text(entities, name).is_none())
        {
            TaskResult::failed(format!("missing entity: {missing}"))
        } else {
            loop {
                let attempt = self.invoke_once(spec, entities).await;
                attempts += 1;
                if attempt.validation || attempt.result.is_ok() || attempts >= max_attempts {
                    break attempt.result;
                }
                let wait = self.retry.backoff(attempts - 1);
                tracing::info!(
                    intent = %spec.intent,
                    attempt = attempts,
                    ?wait,
                    error = ?attempt.result.error,
                    "retrying idempotent action"
                );
                tokio::time::sleep(wait).await;
            }
        };

        let audit = serde_json::json!({
            "event": "task_audit",
            "intent": spec.intent,
            "outcome": result.status,
            "attempts": attempts,
            "duration_ms": start.elapsed().as_millis() as u64,
            "entities_preview": entities_preview(entities),
        });
        tracing::info!(audit = %audit.to_string(), "task");
        result
    }

    async fn invoke_once(&self, spec: &ActionSpec, entities: &Entities) -> Attempt {
        match &spec.handler {
            Handler::InProcess(capability) => {
                self.invoke_capability(capability.clone(), entities, spec.timeout)
                    .await
            }
            Handler::Process(tool) => self.invoke_process(tool, entities, spec.timeout).await,
        }
    }

    async fn invoke_capability(
        &self,
        capability: std::sync::Arc<dyn Capability>,
        entities: &Entities,
        timeout: Duration,
    ) -> Attempt {
        let entities = entities.clone();
        let mut handle = tokio::spawn(async move { capability.invoke(&entities).await });
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(output))) => Attempt::done(TaskResult::ok(self.truncate(output))),
            Ok(Ok(Err(e))) => Attempt::done(TaskResult::failed(e)),
            Ok(Err(join)) => Attempt::done(TaskResult::failed(format!("handler fault: {join}"))),
            Err(_) => {
                handle.abort();
                Attempt::done(TaskResult::timed_out(timeout))
            }
        }
    }

    async fn invoke_process(
        &self,
        tool: &ProcessTool,
        entities: &Entities,
        timeout: Duration,
    ) -> Attempt {
        let (program, args) = match tool.build_command(entities) {
            Ok(cmd) => cmd,
            Err(e) => return Attempt::invalid(e.to_string()),
        };
        if tool.is_detached() {
            return Attempt::done(match spawn_detached(&program, &args) {
                Ok(_) => TaskResult::ok(format!("Attempting to open {program}...")),
                Err(e) => TaskResult::failed(e),
            });
        }
        let out = run_process(&program, &args, timeout).await;
        let result = match out.status {
            ProcessStatus::Exited {
                success: true,
                stdout,
                ..
            } => TaskResult::ok(self.truncate(stdout)),
            ProcessStatus::Exited { code, stderr, .. } => {
                let excerpt = tail_chars(stderr.trim(), STDERR_EXCERPT_CHARS);
                TaskResult::failed(if excerpt.is_empty() {
                    match code {
                        Some(c) => format!("'{program}' exited with code {c}"),
                        None => format!("'{program}' was terminated by a signal"),
                    }
                } else {
                    excerpt
                })
            }
            ProcessStatus::TimedOut => TaskResult::timed_out(timeout),
            ProcessStatus::SpawnFailed(e) => TaskResult::failed(e),
        };
        Attempt::done(result)
    }

    /// 超过 max_output_chars 时截断并追加 ...[truncated]
    fn truncate(&self, s: String) -> String {
        if s.chars().count() > self.max_output_chars {
            format!(
                "{}...[truncated]",
                s.chars().take(self.max_output_chars).collect::<String>()
            )
        } else {
            s
        }
    }
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

fn entities_preview(entities: &Entities) -> String {
    let s = serde_json::to_string(entities).unwrap_or_default();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EntityKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ents(v: serde_json::Value) -> Entities {
        serde_json::from_value(v).unwrap()
    }

    fn fast_executor() -> TaskExecutor {
        TaskExecutor::new(
            RetryPolicy {
                max_retries: 2,
                backoff_base: Duration::from_millis(1),
            },
            8000,
        )
    }

    /// 前 fail_times 次失败，之后成功
    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_times: u32,
    }

    #[async_trait]
    impl Capability for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _entities: &Entities) -> Result<String, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(format!("transient failure {n}"))
            } else {
                Ok("recovered".to_string())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Capability for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _entities: &Entities) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("late".into())
        }
    }

    struct Panicky;

    #[async_trait]
    impl Capability for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn invoke(&self, _entities: &Entities) -> Result<String, String> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_missing_entity_never_invokes_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = ActionSpec::in_process(
            "run_whois",
            Flaky {
                calls: calls.clone(),
                fail_times: 0,
            },
        )
        .require("target");
        let result = fast_executor().execute(&spec, &ents(json!({"other": "x"}))).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("missing entity: target"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_idempotent_handler_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = ActionSpec::in_process(
            "search_web",
            Flaky {
                calls: calls.clone(),
                fail_times: 2,
            },
        )
        .idempotent(true);
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert!(result.is_ok());
        assert_eq!(result.output, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_handler_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = ActionSpec::in_process(
            "send_email",
            Flaky {
                calls: calls.clone(),
                fail_times: 5,
            },
        );
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("transient failure 0"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_stop_at_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let spec = ActionSpec::in_process(
            "search_web",
            Flaky {
                calls: calls.clone(),
                fail_times: 100,
            },
        )
        .idempotent(true);
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_capability_timeout() {
        let spec = ActionSpec::in_process("slow", Slow).with_timeout(Duration::from_millis(50));
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_capability_panic_is_contained() {
        let spec = ActionSpec::in_process("panicky", Panicky);
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("handler fault"));
    }

    #[tokio::test]
    async fn test_malformed_entity_is_validation_failure() {
        let spec = ActionSpec::process(
            "run_whois",
            ProcessTool::new("whois").entity_arg("target_address", EntityKind::Host),
        )
        .require("target_address")
        .idempotent(true);
        let result = fast_executor()
            .execute(&spec, &ents(json!({"target_address": "; cat /etc/passwd"})))
            .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().starts_with("invalid entity target_address"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_entity_never_spawns_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let spec = ActionSpec::process(
            "run_whois",
            ProcessTool::new("sh")
                .arg("-c")
                .arg(format!("touch {}", marker.display())),
        )
        .require("target")
        .idempotent(true);
        let result = fast_executor().execute(&spec, &ents(json!({"other": "x"}))).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("missing entity: target"));
        assert!(!marker.exists());

        // 同一动作补齐实体后确实会运行
        let result = fast_executor().execute(&spec, &ents(json!({"target": "x"}))).await;
        assert!(result.is_ok());
        assert!(marker.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_leaves_no_forked_process() {
        use crate::tools::process::tests::gone_soon;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let spec = ActionSpec::process(
            "run_nmap",
            ProcessTool::new("sh")
                .arg("-c")
                .arg(format!("sleep 30 & echo $! > {}; wait", pid_file.display())),
        )
        .with_timeout(Duration::from_millis(300));
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::TimedOut);

        let bg: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(gone_soon(bg).await, "forked sleep {bg} still running");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_process_reports_launch() {
        let spec = ActionSpec::process(
            "open_application",
            ProcessTool::allowlisted(
                "object_name",
                std::collections::HashMap::from([("nap".to_string(), "sleep".to_string())]),
            )
            .arg("1")
            .detached(),
        )
        .require("object_name")
        .with_timeout(Duration::from_millis(100));
        let result = fast_executor()
            .execute(&spec, &ents(json!({"object_name": "nap"})))
            .await;
        assert_eq!(result, TaskResult::ok("Attempting to open sleep..."));
    }

    #[test]
    fn test_timeout_message_matches_engine_error() {
        let t = Duration::from_millis(1500);
        assert_eq!(
            TaskResult::timed_out(t).error,
            Some(EngineError::Timeout(t).to_string())
        );
        assert_eq!(TaskResult::timed_out(t).error.as_deref(), Some("timed out after 1.5s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_success_and_empty_output() {
        let spec = ActionSpec::process("echo", ProcessTool::new("echo").entity_arg("word", EntityKind::Text));
        let result = fast_executor().execute(&spec, &ents(json!({"word": "hello"}))).await;
        assert!(result.is_ok());
        assert_eq!(result.output.trim(), "hello");

        let spec = ActionSpec::process("true", ProcessTool::new("true"));
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result, TaskResult::ok(""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_nonzero_exit_reports_stderr() {
        let spec = ActionSpec::process(
            "fail",
            ProcessTool::new("sh").arg("-c").arg("echo 'no route to host' >&2; exit 2"),
        );
        let result = fast_executor().execute(&spec, &Entities::new()).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("no route to host"));
    }

    #[test]
    fn test_truncate_and_backoff() {
        let exec = TaskExecutor::new(RetryPolicy::default(), 5);
        assert_eq!(exec.truncate("abcdefgh".into()), "abcde...[truncated]");
        assert_eq!(exec.truncate("abc".into()), "abc");
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }
}

//! 外部工具子进程
//!
//! 参数向量只由字面量与校验过的实体组成，从不经过 shell；stdin 为空，stdout/stderr 并发读取。
//! unix 上子进程是新进程组的组长：超时或退出后按组 SIGKILL，它派生出的进程一并结束，
//! 再等待子进程退出（回收资源），调用返回时整个进程组已不在运行。
//! 图形应用这类需要常驻的程序用 detached 模式启动，不等待、不回收输出。

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::core::EngineError;
use crate::nlu::Entities;
use crate::tools::entities::{entity_text, typed_entity, EntityKind};

/// 子进程退出后等待输出读取完毕的宽限期（孙进程可能仍持有管道）
const READER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub enum Arg {
    Literal(String),
    Entity { name: String, kind: EntityKind },
}

#[derive(Debug, Clone)]
pub enum Program {
    Fixed(String),
    /// 由实体值（小写）在白名单中查出程序；不在白名单则校验失败
    Allowlisted {
        entity: String,
        allowed: HashMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessTool {
    program: Program,
    args: Vec<Arg>,
    detached: bool,
}

impl ProcessTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Program::Fixed(program.into()),
            args: Vec::new(),
            detached: false,
        }
    }

    pub fn allowlisted(entity: impl Into<String>, allowed: HashMap<String, String>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self {
            program: Program::Allowlisted {
                entity: entity.into(),
                allowed,
            },
            args: Vec::new(),
            detached: false,
        }
    }

    /// 启动后立即返回，不受超时约束
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn arg(mut self, literal: impl Into<String>) -> Self {
        self.args.push(Arg::Literal(literal.into()));
        self
    }

    pub fn entity_arg(mut self, name: impl Into<String>, kind: EntityKind) -> Self {
        self.args.push(Arg::Entity {
            name: name.into(),
            kind,
        });
        self
    }

    /// 构造 (program, argv)；任何实体缺失或类型不符都返回 Validation
    pub fn build_command(&self, entities: &Entities) -> Result<(String, Vec<String>), EngineError> {
        let program = match &self.program {
            Program::Fixed(p) => p.clone(),
            Program::Allowlisted { entity, allowed } => {
                let name = entity_text(entities, entity)
                    .ok_or_else(|| EngineError::Validation(format!("missing entity: {entity}")))?;
                allowed.get(&name.to_lowercase()).cloned().ok_or_else(|| {
                    EngineError::Validation(format!("'{name}' is not an allowed application"))
                })?
            }
        };
        let args = self
            .args
            .iter()
            .map(|a| match a {
                Arg::Literal(s) => Ok(s.clone()),
                Arg::Entity { name, kind } => typed_entity(entities, name, *kind),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((program, args))
    }
}

#[derive(Debug)]
pub enum ProcessStatus {
    Exited {
        success: bool,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    SpawnFailed(String),
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub pid: Option<u32>,
    pub status: ProcessStatus,
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        let _ = r.read_to_end(&mut buf).await;
    }
    buf
}

async fn collect(handle: tokio::task::JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(READER_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

/// SIGKILL 整个进程组；子进程是组长，pgid == pid。组已不存在时忽略
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg 只发送信号，不涉及内存
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::trace!(pgid, error = %std::io::Error::last_os_error(), "killpg");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// 启动常驻程序后立即返回 pid；子进程由 tokio 在后台回收
pub fn spawn_detached(program: &str, args: &[String]) -> Result<Option<u32>, String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    cmd.process_group(0);
    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to start '{program}': {e}"))?;
    let pid = child.id();
    tracing::info!(program = %program, args = ?args, pid = ?pid, "detached process spawned");
    Ok(pid)
}

/// 运行子进程，最多等待 timeout；超时则强制终止整个进程组并回收
pub async fn run_process(program: &str, args: &[String], timeout: Duration) -> ProcessOutput {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ProcessOutput {
                pid: None,
                status: ProcessStatus::SpawnFailed(format!("failed to start '{program}': {e}")),
            }
        }
    };
    let pid = child.id();
    tracing::info!(program = %program, args = ?args, pid = ?pid, "process spawned");

    let stdout = tokio::spawn(read_all(child.stdout.take()));
    let stderr = tokio::spawn(read_all(child.stderr.take()));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(exit)) => {
            // 残留的后代进程可能仍持有管道，结束它们后读取才会到 EOF
            kill_group(pid);
            ProcessStatus::Exited {
                success: exit.success(),
                code: exit.code(),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
            }
        }
        Ok(Err(e)) => {
            kill_group(pid);
            stdout.abort();
            stderr.abort();
            ProcessStatus::SpawnFailed(format!("failed to wait for '{program}': {e}"))
        }
        Err(_) => {
            kill_group(pid);
            // kill() 对组长再发一次 SIGKILL 并等待退出
            if let Err(e) = child.kill().await {
                tracing::warn!(pid = ?pid, error = %e, "failed to kill timed out process");
            }
            stdout.abort();
            stderr.abort();
            tracing::warn!(program = %program, pid = ?pid, ?timeout, "process timed out and was killed");
            ProcessStatus::TimedOut
        }
    };
    ProcessOutput { pid, status }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    fn ents(v: serde_json::Value) -> Entities {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_build_command_uses_typed_entities() {
        let tool = ProcessTool::new("whois").entity_arg("target_address", EntityKind::Host);
        let (program, args) = tool
            .build_command(&ents(json!({"target_address": "Example.org"})))
            .unwrap();
        assert_eq!(program, "whois");
        assert_eq!(args, vec!["example.org"]);

        let err = tool
            .build_command(&ents(json!({"target_address": "example.org && reboot"})))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_allowlisted_program() {
        let allowed = HashMap::from([("Calculator".to_string(), "gnome-calculator".to_string())]);
        let tool = ProcessTool::allowlisted("object_name", allowed);
        let (program, args) = tool
            .build_command(&ents(json!({"object_name": ["calculator"]})))
            .unwrap();
        assert_eq!(program, "gnome-calculator");
        assert!(args.is_empty());
        assert!(tool
            .build_command(&ents(json!({"object_name": "rm"})))
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = run_process("sh", &["-c".into(), "echo hi; echo oops >&2; exit 3".into()], Duration::from_secs(5)).await;
        match out.status {
            ProcessStatus::Exited { success, code, stdout, stderr } => {
                assert!(!success);
                assert_eq!(code, Some(3));
                assert_eq!(stdout.trim(), "hi");
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    /// /proc/<pid> 存在且不是僵尸进程
    #[cfg(target_os = "linux")]
    pub(crate) fn alive(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let state = stat.rsplit_once(')')?.1.trim_start().chars().next()?;
                Some(state != 'Z' && state != 'X')
            })
            .unwrap_or(false)
    }

    /// SIGKILL 异步送达，给一点时间
    #[cfg(target_os = "linux")]
    pub(crate) async fn gone_soon(pid: u32) -> bool {
        for _ in 0..50 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_forked_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let out = run_process("sh", &["-c".into(), script], Duration::from_millis(300)).await;
        assert!(matches!(out.status, ProcessStatus::TimedOut));

        let bg: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(gone_soon(bg).await, "background sleep {bg} survived the timeout");
        assert!(!alive(out.pid.unwrap()));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_lingering_descendant_does_not_swallow_output() {
        let started = std::time::Instant::now();
        let out = run_process(
            "sh",
            &["-c".into(), "sleep 30 & echo $!; echo done".into()],
            Duration::from_secs(10),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        let ProcessStatus::Exited { success, stdout, .. } = out.status else {
            panic!("unexpected status: {:?}", out.status);
        };
        assert!(success);
        let mut lines = stdout.lines();
        let bg: u32 = lines.next().unwrap().trim().parse().unwrap();
        assert_eq!(lines.next(), Some("done"));
        assert!(gone_soon(bg).await, "background sleep {bg} outlived the call");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_spawn_returns_immediately() {
        let started = std::time::Instant::now();
        let pid = spawn_detached("sleep", &["1".into()]).unwrap();
        assert!(pid.is_some());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(spawn_detached("definitely-not-a-real-binary-xyz", &[]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let out = run_process("sleep", &["5".into()], Duration::from_millis(200)).await;
        assert!(matches!(out.status, ProcessStatus::TimedOut));
        let pid = out.pid.expect("pid");
        // 已被 kill 并回收
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let out = run_process("definitely-not-a-real-binary-xyz", &[], Duration::from_secs(1)).await;
        assert!(matches!(out.status, ProcessStatus::SpawnFailed(_)));
        assert!(out.pid.is_none());
    }
}

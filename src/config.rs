//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MOBIUS__*` 覆盖（双下划线表示嵌套，如 `MOBIUS__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub dispatch: DispatchSection,
    pub executor: ExecutorSection,
    /// [actions.<intent>] 段：单个动作的超时 / 幂等覆盖
    pub actions: HashMap<String, ActionOverride>,
    pub tools: ToolsSection,
}

/// [app] 段：应用名与对话用 system prompt
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Mobius".to_string(),
            system_prompt: "You are Mobius, a concise and helpful personal assistant. \
                Answer the user's latest message using the conversation so far."
                .to_string(),
        }
    }
}

/// [logging] 段：日志级别与可选日志文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时回退到环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

/// [memory] 段：短期窗口、长期保留期限与 SQLite 路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 未设置时仅使用内存记忆
    pub database_path: Option<PathBuf>,
    pub short_term_limit: usize,
    /// 长期保留天数；0 表示关闭剪枝
    pub retention_days: u64,
    pub prune_interval_secs: u64,
    /// 启动时从持久化日志恢复的最近 Turn 数
    pub restore_limit: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            database_path: Some(PathBuf::from("data/mobius_memory.db")),
            short_term_limit: 10,
            retention_days: 180,
            prune_interval_secs: 3600,
            restore_limit: 200,
        }
    }
}

impl MemorySection {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0).then(|| Duration::from_secs(self.retention_days * 24 * 3600))
    }
}

/// [dispatch] 段：动作路径的置信度阈值与可自动触发的意图集合
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub confidence_threshold: f32,
    pub actionable_intents: Vec<String>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            actionable_intents: default_actionable_intents(),
        }
    }
}

fn default_actionable_intents() -> Vec<String> {
    [
        "get_current_datetime",
        "search_web",
        "run_whois",
        "run_nmap",
        "open_application",
        "send_email",
        "schedule_meeting",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// [executor] 段：重试、退避与输出截断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// 仅对标记为幂等的动作生效
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_output_chars: usize,
    pub default_timeout_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 200,
            max_output_chars: 8000,
            default_timeout_secs: 30,
        }
    }
}

/// [actions.<intent>] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ActionOverride {
    pub timeout_secs: Option<u64>,
    pub idempotent: Option<bool>,
}

/// [tools] 段：外部程序路径、搜索端点、应用白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub whois_program: String,
    pub nmap_program: String,
    pub nmap_timeout_secs: u64,
    pub search: SearchSection,
    /// open_application 允许打开的应用：名称（小写）→ 程序
    pub applications: HashMap<String, String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            whois_program: "whois".to_string(),
            nmap_program: "nmap".to_string(),
            nmap_timeout_secs: 120,
            search: SearchSection::default(),
            applications: HashMap::new(),
        }
    }
}

/// [tools.search] 段：DuckDuckGo Instant Answer 端点与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_related_topics: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.duckduckgo.com/".to_string(),
            timeout_secs: 10,
            max_related_topics: 5,
        }
    }
}

impl AppConfig {
    /// 某动作的最终超时：[actions.<intent>] 覆盖 > 调用方给的默认值
    pub fn action_timeout(&self, intent: &str, fallback_secs: u64) -> Duration {
        let secs = self
            .actions
            .get(intent)
            .and_then(|o| o.timeout_secs)
            .unwrap_or(fallback_secs);
        Duration::from_secs(secs)
    }

    pub fn action_idempotent(&self, intent: &str, fallback: bool) -> bool {
        self.actions
            .get(intent)
            .and_then(|o| o.idempotent)
            .unwrap_or(fallback)
    }
}

/// 从 config 目录加载配置，环境变量 MOBIUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MOBIUS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MOBIUS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

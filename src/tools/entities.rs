//! 实体取值与类型校验
//!
//! NLU 给出的实体是无类型 JSON；在拼进外部程序参数前必须通过 EntityKind 校验。
//! 校验失败一律是 Validation 错误，不会调用处理器。

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::EngineError;
use crate::nlu::Entities;

const MAX_TEXT_LEN: usize = 512;

static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();

fn domain_re() -> &'static Regex {
    DOMAIN_RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)*[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$")
            .unwrap()
    })
}

/// 外部程序参数允许的实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// 域名或 IP 地址
    Host,
    /// 任意单个参数：无控制字符，不以 '-' 开头（防止被当作选项）
    Text,
    Integer,
}

/// 取实体的文本值；列表取第一个元素，null / 对象视为缺失
pub fn entity_text(entities: &Entities, name: &str) -> Option<String> {
    fn scalar(v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(items) => items.first().and_then(scalar),
            Value::Null | Value::Object(_) => None,
        }
    }
    entities
        .get(name)
        .and_then(scalar)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 按类型校验并返回规范化后的值
pub fn validate(kind: EntityKind, name: &str, value: &str) -> Result<String, EngineError> {
    let invalid = |why: &str| EngineError::Validation(format!("invalid entity {name}: {why}"));
    let value = value.trim();
    match kind {
        EntityKind::Host => {
            if let Ok(ip) = value.parse::<IpAddr>() {
                return Ok(ip.to_string());
            }
            if value.len() > 253 || !domain_re().is_match(value) {
                return Err(invalid("not a hostname or IP address"));
            }
            Ok(value.to_lowercase())
        }
        EntityKind::Text => {
            if value.starts_with('-') {
                return Err(invalid("may not start with '-'"));
            }
            if value.chars().any(char::is_control) {
                return Err(invalid("contains control characters"));
            }
            if value.chars().count() > MAX_TEXT_LEN {
                return Err(invalid("too long"));
            }
            Ok(value.to_string())
        }
        EntityKind::Integer => value
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| invalid("not an integer")),
    }
}

/// 取出并校验；缺失时报 missing entity
pub fn typed_entity(entities: &Entities, name: &str, kind: EntityKind) -> Result<String, EngineError> {
    let raw = entity_text(entities, name)
        .ok_or_else(|| EngineError::Validation(format!("missing entity: {name}")))?;
    validate(kind, name, &raw)
}

//! 关键词意图识别器（无需模型）
//!
//! 规则按从具体到宽泛的顺序匹配；命中规则且抽到关键实体时置信度 0.9，
//! 缺少关键实体时 0.55（低于默认阈值，分发会退回对话路径）。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::nlu::{Entities, IntentClassifier, IntentResult, NluError};

const CONFIDENT: f32 = 0.9;
const UNSURE: f32 = 0.55;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static HOST_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn host_re() -> &'static Regex {
    HOST_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:(?:\d{1,3}\.){3}\d{1,3}|(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63})\b",
        )
        .unwrap()
    })
}

const SEARCH_VERBS: &[&str] = &["search", "find", "google"];
const PREPOSITIONS: &[&str] = &["for", "about", "on"];
const FILLERS: &[&str] = &["me", "us", "some", "any", "a", "an", "the"];
const OPEN_VERBS: &[&str] = &["open", "launch", "start"];
const TIME_MARKERS: &[&str] = &[
    "today", "tonight", "tomorrow", "next", "this", "at", "on", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday",
];

/// 一条输入的分词视图：原样 token 与去标点小写 token 一一对应
struct Tokens<'a> {
    raw: Vec<&'a str>,
    lower: Vec<String>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        let raw: Vec<&str> = text.split_whitespace().collect();
        let lower = raw
            .iter()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .collect();
        Self { raw, lower }
    }

    fn has(&self, word: &str) -> bool {
        self.lower.iter().any(|w| w == word)
    }

    fn has_any(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.has(w))
    }

    fn position_any(&self, words: &[&str]) -> Option<usize> {
        self.lower.iter().position(|w| words.contains(&w.as_str()))
    }

    /// 从 start 起拼接原样 token，去掉句末标点
    fn rest_from(&self, start: usize) -> Option<String> {
        let s = self.raw.get(start..)?.join(" ");
        let s = s.trim_end_matches(['?', '.', '!', ',']).trim().to_string();
        (!s.is_empty()).then_some(s)
    }
}

#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 同步识别：返回 (intent, 关键实体名)
    fn recognize(tokens: &Tokens<'_>, text: &str) -> Option<(&'static str, Option<&'static str>)> {
        let has_host = find_host(text).is_some();
        if tokens.has("whois") {
            return Some(("run_whois", Some("target_address")));
        }
        if tokens.has("nmap")
            || (tokens.has_any(&["scan", "portscan"])
                && (tokens.has_any(&["port", "ports", "network"]) || has_host))
        {
            return Some(("run_nmap", Some("target_address")));
        }
        if tokens.has("meeting") && tokens.has_any(&["schedule", "book", "arrange", "set"]) {
            return Some(("schedule_meeting", Some("datetime")));
        }
        if tokens.has_any(&["send", "write"]) && tokens.has_any(&["email", "mail", "e-mail"]) {
            return Some(("send_email", Some("email_address")));
        }
        if let Some(i) = tokens.position_any(OPEN_VERBS) {
            if i + 1 < tokens.raw.len() {
                return Some(("open_application", Some("object_name")));
            }
        }
        if tokens.has_any(SEARCH_VERBS) || text.to_lowercase().contains("look up") {
            return Some(("search_web", Some("search_query")));
        }
        if tokens.has_any(&["time", "date", "day", "today"])
            && !tokens.has_any(&["schedule", "meeting", "remind", "reminder"])
        {
            return Some(("get_current_datetime", None));
        }
        None
    }

    fn extract(tokens: &Tokens<'_>, text: &str, intent: &str) -> Entities {
        let mut entities = Entities::new();

        if let Some(m) = email_re().find(text) {
            entities.insert("email_address".into(), Value::String(m.as_str().to_string()));
        }
        if let Some(host) = find_host(text) {
            entities.insert("target_address".into(), Value::String(host));
        }
        if let Some(i) = tokens.position_any(&["with"]) {
            if let Some(next) = tokens.raw.get(i + 1) {
                let name = next.trim_matches(|c: char| !c.is_alphanumeric());
                if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                    entities.insert("person".into(), Value::String(name.to_string()));
                }
            }
        }

        match intent {
            "search_web" => {
                if let Some(q) = search_query(tokens) {
                    entities.insert("search_query".into(), Value::String(q));
                }
            }
            "open_application" => {
                if let Some(name) = object_name(tokens) {
                    entities.insert("object_name".into(), Value::String(name));
                }
            }
            "schedule_meeting" => {
                if let Some(dt) = tokens.position_any(TIME_MARKERS).and_then(|i| {
                    // "for next Tuesday" / "at 3 PM"：介词本身不是时间的一部分
                    let start = if matches!(tokens.lower[i].as_str(), "at" | "on") { i + 1 } else { i };
                    tokens.rest_from(start)
                }) {
                    entities.insert("datetime".into(), Value::String(dt));
                }
            }
            _ => {}
        }
        entities
    }
}

/// 第一个域名或 IPv4；邮箱中的域名不算
fn find_host(text: &str) -> Option<String> {
    let without_emails = email_re().replace_all(text, " ");
    host_re()
        .find(&without_emails)
        .map(|m| m.as_str().to_lowercase())
}

/// 搜索动词之后的内容：跳过一个介词与若干虚词
fn search_query(tokens: &Tokens<'_>) -> Option<String> {
    let mut i = match tokens.position_any(SEARCH_VERBS) {
        Some(i) => i + 1,
        None => {
            let look = tokens
                .lower
                .windows(2)
                .position(|w| w[0] == "look" && w[1] == "up")?;
            look + 2
        }
    };
    if tokens.lower.get(i).is_some_and(|w| PREPOSITIONS.contains(&w.as_str())) {
        i += 1;
    }
    while tokens.lower.get(i).is_some_and(|w| FILLERS.contains(&w.as_str())) {
        i += 1;
    }
    tokens.rest_from(i)
}

/// 打开动词之后最多 3 个词，遇到标点结束
fn object_name(tokens: &Tokens<'_>) -> Option<String> {
    let start = tokens.position_any(OPEN_VERBS)? + 1;
    let mut parts = Vec::new();
    for raw in tokens.raw.iter().skip(start) {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '-');
        let lower = word.to_lowercase();
        if parts.is_empty() && matches!(lower.as_str(), "the" | "a" | "an" | "my") {
            continue;
        }
        if !word.is_empty() {
            parts.push(word.trim_end_matches('.').to_string());
        }
        if parts.len() >= 3 || raw.ends_with([',', '.', '!', '?']) {
            break;
        }
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, utterance: &str) -> Result<IntentResult, NluError> {
        let tokens = Tokens::new(utterance);
        let Some((intent, key_entity)) = Self::recognize(&tokens, utterance) else {
            return Ok(IntentResult::unknown());
        };
        let entities = Self::extract(&tokens, utterance, intent);
        let confidence = match key_entity {
            Some(key) if !entities.contains_key(key) => UNSURE,
            _ => CONFIDENT,
        };
        tracing::debug!(intent, confidence, entities = ?entities, "keyword classification");
        Ok(IntentResult::new(intent, entities, confidence))
    }
}

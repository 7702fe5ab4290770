//! 邮件集成：MailService 协作方 + send_email 能力
//!
//! 发送由外部邮件服务完成；未配置时返回明确的失败信息而不是静默成功。

use std::sync::Arc;

use async_trait::async_trait;

use crate::nlu::Entities;
use crate::tools::entities::entity_text;
use crate::tools::Capability;

#[async_trait]
pub trait MailService: Send + Sync {
    /// 成功时返回给用户的确认文本
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<String, String>;
}

#[derive(Debug, Default)]
pub struct UnconfiguredMail;

#[async_trait]
impl MailService for UnconfiguredMail {
    async fn send(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<String, String> {
        Err("Email service not configured. Please check the mail settings.".to_string())
    }
}

pub struct SendEmailCapability {
    service: Arc<dyn MailService>,
}

impl SendEmailCapability {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Capability for SendEmailCapability {
    fn name(&self) -> &str {
        "send_email"
    }

    async fn invoke(&self, entities: &Entities) -> Result<String, String> {
        let recipient = entity_text(entities, "email_address")
            .ok_or_else(|| "Could not determine recipient for email".to_string())?;
        if !recipient.contains('@') || recipient.chars().any(char::is_whitespace) {
            return Err(format!("'{recipient}' is not a valid email address"));
        }
        let subject = entity_text(entities, "subject").unwrap_or_else(|| "Quick Question".to_string());
        let body = entity_text(entities, "body").unwrap_or_else(|| "...".to_string());
        tracing::info!(recipient = %recipient, subject = %subject, "sending email");
        self.service.send(&recipient, &subject, &body).await
    }
}

//! 日历集成：CalendarService 协作方 + schedule_meeting 能力

use std::sync::Arc;

use async_trait::async_trait;

use crate::nlu::Entities;
use crate::tools::entities::entity_text;
use crate::tools::Capability;

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// start 为自然语言时间（如 "next Tuesday at 3 PM"），由服务端解析
    async fn schedule(&self, summary: &str, start: &str) -> Result<String, String>;
}

#[derive(Debug, Default)]
pub struct UnconfiguredCalendar;

#[async_trait]
impl CalendarService for UnconfiguredCalendar {
    async fn schedule(&self, _summary: &str, _start: &str) -> Result<String, String> {
        Err("Calendar service not configured. Please check the calendar credentials.".to_string())
    }
}

pub struct ScheduleMeetingCapability {
    service: Arc<dyn CalendarService>,
}

impl ScheduleMeetingCapability {
    pub fn new(service: Arc<dyn CalendarService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Capability for ScheduleMeetingCapability {
    fn name(&self) -> &str {
        "schedule_meeting"
    }

    async fn invoke(&self, entities: &Entities) -> Result<String, String> {
        let start = entity_text(entities, "datetime")
            .ok_or_else(|| "No meeting time specified".to_string())?;
        let person = entity_text(entities, "person").unwrap_or_else(|| "Someone".to_string());
        let summary = format!("Meeting with {person}");
        tracing::info!(summary = %summary, start = %start, "scheduling meeting");
        self.service.schedule(&summary, &start).await
    }
}

//! 当前日期时间（进程内能力）

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};

use crate::nlu::Entities;
use crate::tools::Capability;

pub struct ClockCapability;

pub fn describe_time<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "The current date and time is {}.",
        now.format("%A, %B %d, %Y at %I:%M %p")
    )
}

#[async_trait]
impl Capability for ClockCapability {
    fn name(&self) -> &str {
        "clock"
    }

    async fn invoke(&self, _entities: &Entities) -> Result<String, String> {
        Ok(describe_time(&Local::now()))
    }
}

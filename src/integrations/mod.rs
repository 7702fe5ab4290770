//! 外部集成：邮件、日历（服务本身是协作方，这里只有契约与对应能力）

pub mod calendar;
pub mod email;

use std::sync::Arc;

pub use calendar::{CalendarService, ScheduleMeetingCapability, UnconfiguredCalendar};
pub use email::{MailService, SendEmailCapability, UnconfiguredMail};

/// 注入到内置动作目录的外部服务
#[derive(Clone)]
pub struct Services {
    pub mail: Arc<dyn MailService>,
    pub calendar: Arc<dyn CalendarService>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            mail: Arc::new(UnconfiguredMail),
            calendar: Arc::new(UnconfiguredCalendar),
        }
    }
}

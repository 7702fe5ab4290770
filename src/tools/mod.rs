//! 动作层：注册表、任务执行器、外部进程、实体校验与内置能力

pub mod catalog;
pub mod clock;
pub mod entities;
pub mod executor;
pub mod process;
pub mod registry;
pub mod search;

pub use catalog::build_registry;
pub use clock::ClockCapability;
pub use entities::{entity_text, EntityKind};
pub use executor::{RetryPolicy, TaskExecutor, TaskResult, TaskStatus};
pub use process::{run_process, ProcessOutput, ProcessStatus, ProcessTool};
pub use registry::{ActionRegistry, ActionSpec, Capability, Handler};
pub use search::WebSearchCapability;

//! 核心层：错误分类、分发状态机、分发控制器

pub mod dispatch;
pub mod error;
pub mod state;

pub use dispatch::{
    DispatchController, DispatchOutcome, DispatchPath, DispatchSettings, GENERATION_FALLBACK,
};
pub use error::EngineError;
pub use state::{DispatchPhase, PhaseTrace};

//! NLU 层：意图识别协作方契约与内置关键词识别器

pub mod keyword;
pub mod types;

pub use keyword::KeywordClassifier;
pub use types::{Entities, IntentClassifier, IntentResult, NluError, UNKNOWN_INTENT};

//! 执行层：任务事件与单次提示的执行器

pub mod events;
pub mod loop_;

pub use events::{AgentEvent, EventKind, EventPayload};
pub use loop_::{parse_arguments, run_prompt, ReactSession, MAX_MODEL_ROUNDS};

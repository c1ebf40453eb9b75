//! 核心层：错误、会话状态、事件总线、任务监管、构建与多会话运行时

pub mod builder;
pub mod error;
pub mod event_bus;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, AgentBuilder};
pub use error::AgentError;
pub use event_bus::EventBus;
pub use orchestrator::AgentRuntime;
pub use session_supervisor::{CancelSignals, SessionSupervisor};
pub use state::{ConversationState, SharedState};

//! RyAgent - Rust 会话智能体运行时
//!
//! 模块划分：
//! - **agent**: 单会话 Agent（提交、中断、协作式停止、历史）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、会话状态、事件总线、任务监管、构建器与多会话运行时
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话消息模型
//! - **observability**: 日志初始化
//! - **react**: 任务事件与执行器
//! - **tools**: 工具注册表、沙箱策略与内置工具（shell_run、fs_read、fs_write）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, TaskHandle};
pub use crate::core::{AgentBuilder, AgentError, AgentRuntime, EventBus};
pub use react::{AgentEvent, EventKind, EventPayload};

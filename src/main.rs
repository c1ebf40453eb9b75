//! RyAgent - 命令行 REPL
//!
//! 入口：初始化日志、按配置构建运行时，在会话 "default" 上读取标准输入逐行提交。
//! 命令：/stop 协作式停止，/clear 清空历史，/quit 退出；Ctrl+C 中断当前任务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ryagent::config::load_config_or_default;
use ryagent::{observability, AgentBuilder, AgentEvent, EventBus, EventPayload};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONVERSATION_ID: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config_or_default(config_path);
    let runtime = AgentBuilder::new(cfg).build();
    let agent = runtime.create_conversation(Some(CONVERSATION_ID), None);

    let printer = tokio::spawn(print_events(Arc::clone(runtime.bus())));

    println!("RyAgent ready (model: {}). /stop /clear /quit", runtime.llm().model_name());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                if !agent.interrupt().await {
                    println!("(nothing to interrupt)");
                }
                continue;
            }
        };
        let Some(line) = line else { break };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/stop" => {
                agent.request_stop().await;
            }
            "/clear" => match agent.clear_history() {
                Ok(()) => println!("(history cleared)"),
                Err(e) => println!("(cannot clear: {})", e),
            },
            prompt => {
                agent.submit(prompt).await;
            }
        }
    }

    runtime.remove_conversation(CONVERSATION_ID).await;
    printer.abort();
    Ok(())
}

async fn print_events(bus: Arc<EventBus>) {
    while let Some(event) = bus.get_next(CONVERSATION_ID).await {
        if let Some(text) = render(&event) {
            println!("{}", text);
        }
    }
}

fn render(event: &AgentEvent) -> Option<String> {
    match &event.payload {
        EventPayload::UserPrompt { .. } => None,
        EventPayload::AgentReply { message } => {
            let mut out = message.content().to_string();
            for call in message.tool_calls() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("-> {}({})", call.name, call.arguments));
            }
            Some(format!("assistant: {}", out))
        }
        EventPayload::ToolRequest { tool_name, .. } => Some(format!("[running {}]", tool_name)),
        EventPayload::ToolResult { result, .. } => Some(format!(
            "[tool result]\n{}",
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
        )),
        EventPayload::Error { error } => Some(format!("error: {}", error)),
        EventPayload::Interrupt => Some("(interrupted)".to_string()),
    }
}

//! Shell 执行器：命令首词经 CommandPolicy 校验后在工作区内执行
//!
//! 通过 sh -c / cmd /C 执行，stdout / stderr 分别捕获并截断。unix 上子进程自成进程组：
//! 超时先对整组 SIGTERM，宽限期后 SIGKILL；调用被取消（future 被丢弃）时整组直接 SIGKILL。
//! 拒绝、超时与启动失败都以 returncode = -1、空输出报告。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::tools::policy::CommandPolicy;
use crate::tools::schema::args_schema;
use crate::tools::{Tool, ToolDescriptor};

pub const SHELL_TOOL_NAME: &str = "shell_run";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_KILL_GRACE_SECS: u64 = 5;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4096;

#[derive(Debug, Deserialize, JsonSchema)]
struct ShellArgs {
    #[schemars(description = "The command to execute")]
    cmd: String,
    #[schemars(description = "Timeout in seconds (default 60)")]
    timeout_s: Option<u64>,
}

/// 命令执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub error: Option<String>,
}

impl ShellOutput {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            returncode: -1,
            error: Some(error.into()),
        }
    }
}

/// Shell 工具
pub struct ShellRunTool {
    policy: CommandPolicy,
    workspace: PathBuf,
    default_timeout: Duration,
    kill_grace: Duration,
    max_output_bytes: usize,
}

impl ShellRunTool {
    pub fn new(policy: CommandPolicy, workspace: impl AsRef<Path>) -> Self {
        Self {
            policy,
            workspace: workspace.as_ref().to_path_buf(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// 执行命令；被策略拒绝时不创建任何进程
    pub async fn run_command(&self, raw: &str, timeout: Duration) -> ShellOutput {
        let raw = raw.trim();
        if let Err(reason) = self.policy.check(raw) {
            tracing::warn!(command = %raw, "shell command rejected");
            return ShellOutput::failed(reason);
        }

        tracing::info!(command = %raw, ?timeout, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", raw]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", raw]);
            c
        };
        cmd.current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ShellOutput::failed(format!("Command execution failed: {}", e)),
        };
        let mut group = ProcessGroup::of(&child);
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let waited = tokio::time::timeout(timeout, async {
            tokio::join!(read_pipe(stdout_pipe), read_pipe(stderr_pipe), child.wait())
        })
        .await;

        match waited {
            Ok((stdout, stderr, Ok(status))) => {
                group.disarm();
                ShellOutput {
                    stdout: truncate_utf8(&stdout, self.max_output_bytes),
                    stderr: truncate_utf8(&stderr, self.max_output_bytes),
                    returncode: status.code().unwrap_or(-1),
                    error: None,
                }
            }
            Ok((_, _, Err(e))) => ShellOutput::failed(format!("Command execution failed: {}", e)),
            Err(_) => {
                self.terminate(&mut child, &group).await;
                ShellOutput::failed(format!("Command timed out after {:?}", timeout))
            }
        }
    }

    /// 先对整个进程组 SIGTERM，宽限期后仍未退出再强制 kill；组内残留由 ProcessGroup 的 drop 清理
    async fn terminate(&self, child: &mut Child, group: &ProcessGroup) {
        #[cfg(unix)]
        {
            group.signal(nix::sys::signal::Signal::SIGTERM);
            if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                return;
            }
            tracing::warn!(pgid = ?group.pgid, "process group ignored SIGTERM, killing");
        }
        #[cfg(not(unix))]
        let _ = group;
        if let Err(e) = child.kill().await {
            tracing::warn!("failed to kill timed out process: {}", e);
        }
    }
}

/// 子进程所在的进程组；未解除时 drop 会对整组发 SIGKILL
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        let pgid = if cfg!(unix) {
            child.id().and_then(|pid| i32::try_from(pid).ok())
        } else {
            None
        };
        Self { pgid }
    }

    /// 命令正常结束后调用，之后不再向该组发信号
    fn disarm(&mut self) {
        self.pgid = None;
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid {
            match killpg(Pid::from_raw(pgid), signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid, ?signal, error = %e, "failed to signal process group"),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// 有损解码后按字节上限截断，截断点落在字符边界上
fn truncate_utf8(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[async_trait]
impl Tool for ShellRunTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: SHELL_TOOL_NAME.to_string(),
            description: "Execute shell commands with safety restrictions".to_string(),
            input_schema: args_schema::<ShellArgs>(),
            dangerous: true,
        }
    }

    async fn run(&self, args: Value) -> Result<Value, String> {
        let args: ShellArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))?;
        let timeout = args
            .timeout_s
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let output = self.run_command(&args.cmd, timeout).await;
        serde_json::to_value(output).map_err(|e| e.to_string())
    }
}

//! 沙箱文件系统工具
//!
//! FileReadTool / FileWriteTool 共用 Workspace 的包含检查：路径先解析、再校验，
//! 校验失败时不打开任何文件句柄。失败以结构化字段 `error` 报告给模型。

use std::path::Path;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::tools::policy::{FsError, Workspace};
use crate::tools::schema::args_schema;
use crate::tools::{Tool, ToolDescriptor};

pub const READ_TOOL_NAME: &str = "fs_read";
pub const WRITE_TOOL_NAME: &str = "fs_write";
pub const DEFAULT_MAX_READ_BYTES: usize = 65536;

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadArgs {
    #[schemars(description = "Path to the file to read, relative to the workspace")]
    path: String,
    #[schemars(description = "Maximum bytes to read (default 65536)")]
    bytes: Option<usize>,
}

/// 写入模式：create 在目标已存在时失败，overwrite 覆盖
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Create,
    Overwrite,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WriteArgs {
    #[schemars(description = "Path to the file to write, relative to the workspace")]
    path: String,
    #[schemars(description = "Content to write to the file")]
    content: String,
    #[schemars(description = "Write mode: create (fail if exists) or overwrite")]
    #[serde(default)]
    mode: WriteMode,
}

/// 读取结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadOutput {
    pub content: String,
    /// 文件实际字节数
    pub size: u64,
    pub truncated: bool,
}

/// 读文件工具
pub struct FileReadTool {
    workspace: Workspace,
    default_max_bytes: usize,
}

impl FileReadTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            workspace: Workspace::new(root_dir),
            default_max_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_default_max_bytes(mut self, max: usize) -> Self {
        self.default_max_bytes = max;
        self
    }

    pub async fn read(&self, path: &str, max_bytes: usize) -> Result<ReadOutput, FsError> {
        let resolved = self.workspace.resolve(path)?;
        let meta = match fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FsError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(FsError::NotAFile(path.to_string()));
        }

        let file = fs::File::open(&resolved).await?;
        let mut buf = Vec::with_capacity(max_bytes.min(meta.len() as usize));
        file.take(max_bytes as u64).read_to_end(&mut buf).await?;

        Ok(ReadOutput {
            content: String::from_utf8_lossy(&buf).into_owned(),
            size: meta.len(),
            truncated: meta.len() > max_bytes as u64,
        })
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: READ_TOOL_NAME.to_string(),
            description: "Read file contents with size limits".to_string(),
            input_schema: args_schema::<ReadArgs>(),
            dangerous: false,
        }
    }

    async fn run(&self, args: Value) -> Result<Value, String> {
        let args: ReadArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))?;
        tracing::info!(path = %args.path, "fs_read tool execute");
        let max = args.bytes.unwrap_or(self.default_max_bytes);
        Ok(match self.read(&args.path, max).await {
            Ok(out) => json!({
                "content": out.content,
                "size": out.size,
                "truncated": out.truncated,
                "error": null,
            }),
            Err(e) => json!({
                "content": "",
                "size": 0,
                "truncated": false,
                "error": e.to_string(),
            }),
        })
    }
}

/// 写文件工具
pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            workspace: Workspace::new(root_dir),
        }
    }

    /// 写入全部内容，返回写入字节数；按需创建父目录
    pub async fn write(&self, path: &str, content: &str, mode: WriteMode) -> Result<usize, FsError> {
        let resolved = self.workspace.resolve(path)?;
        if mode == WriteMode::Create && fs::metadata(&resolved).await.is_ok() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        match mode {
            WriteMode::Create => options.create_new(true),
            WriteMode::Overwrite => options.create(true).truncate(true),
        };
        let mut file = match options.open(&resolved).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FsError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(content.len())
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: WRITE_TOOL_NAME.to_string(),
            description: "Write content to files with safety checks".to_string(),
            input_schema: args_schema::<WriteArgs>(),
            dangerous: true,
        }
    }

    async fn run(&self, args: Value) -> Result<Value, String> {
        let args: WriteArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))?;
        tracing::info!(path = %args.path, mode = ?args.mode, "fs_write tool execute");
        Ok(match self.write(&args.path, &args.content, args.mode).await {
            Ok(n) => json!({ "bytes_written": n, "error": null }),
            Err(e) => json!({ "bytes_written": 0, "error": e.to_string() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_reports_truncation_and_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "0123456789").unwrap();
        let tool = FileReadTool::new(dir.path());

        let out = tool.read("a.txt", 4).await.unwrap();
        assert_eq!(out.content, "0123");
        assert_eq!(out.size, 10);
        assert!(out.truncated);

        let out = tool.read("./a.txt", 64).await.unwrap();
        assert_eq!(out.content, "0123456789");
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn test_read_distinguishes_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let tool = FileReadTool::new(dir.path());

        assert!(matches!(tool.read("missing.txt", 10).await, Err(FsError::NotFound(_))));
        assert!(matches!(tool.read("sub", 10).await, Err(FsError::NotAFile(_))));
        assert!(matches!(tool.read("../secret", 10).await, Err(FsError::OutsideWorkspace(_))));
    }

    #[tokio::test]
    async fn test_read_tool_output_shape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(dir.path());
        let out = tool.run(json!({"path": "../secret"})).await.unwrap();
        assert_eq!(out["error"], "Path outside workspace: ../secret");
        assert_eq!(out["content"], "");
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn test_write_create_then_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileWriteTool::new(dir.path());

        let n = tool.write("nested/dir/out.txt", "héllo", WriteMode::Create).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(std::fs::read_to_string(dir.path().join("nested/dir/out.txt")).unwrap(), "héllo");

        assert!(matches!(
            tool.write("nested/dir/out.txt", "x", WriteMode::Create).await,
            Err(FsError::AlreadyExists(_))
        ));
        tool.write("nested/dir/out.txt", "x", WriteMode::Overwrite).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("nested/dir/out.txt")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_write_outside_workspace_creates_nothing() {
        let parent = tempfile::tempdir().unwrap();
        let ws = parent.path().join("ws");
        std::fs::create_dir(&ws).unwrap();
        let tool = FileWriteTool::new(&ws);

        let out = tool
            .run(json!({"path": "../secret", "content": "x", "mode": "overwrite"}))
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 0);
        assert_eq!(out["error"], "Path outside workspace: ../secret");
        assert!(!parent.path().join("secret").exists());
    }

    #[tokio::test]
    async fn test_write_mode_defaults_to_create() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("exists.txt"), "old").unwrap();
        let tool = FileWriteTool::new(dir.path());
        let out = tool.run(json!({"path": "exists.txt", "content": "new"})).await.unwrap();
        assert_eq!(out["error"], "File already exists: exists.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("exists.txt")).unwrap(), "old");
    }
}

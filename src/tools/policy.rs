//! 沙箱策略：命令允许/拒绝名单与工作区路径包含检查
//!
//! CommandPolicy 只看命令首词；拒绝名单优先于允许名单，允许名单为空表示不限制。
//! Workspace 绑定根目录，按路径分段判断祖先关系（`/ws` 不会匹配 `/ws-evil`），
//! 对尚不存在的目标先做词法归一化，再解析已存在部分的符号链接。

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// 文件工具失败原因；「工作区外」与「不存在」「不是文件」分开报告
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path outside workspace: {0}")]
    OutsideWorkspace(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shell 命令策略
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allowed: Option<HashSet<String>>,
    denied: HashSet<String>,
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>, denied: Vec<String>) -> Self {
        let allowed = if allowed.is_empty() {
            None
        } else {
            Some(allowed.into_iter().collect())
        };
        Self {
            allowed,
            denied: denied.into_iter().collect(),
        }
    }

    /// 解析命令：只取第一个 token 作为命令名
    pub fn command_name(raw: &str) -> &str {
        raw.split_whitespace().next().unwrap_or("")
    }

    pub fn check(&self, raw: &str) -> Result<(), String> {
        let name = Self::command_name(raw);
        if name.is_empty() {
            return Err("Command not allowed: empty".to_string());
        }
        if self.denied.contains(name) {
            return Err(format!("Command not allowed: {}", name));
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(name) {
                return Err(format!("Command not allowed: {}", name));
            }
        }
        Ok(())
    }
}

/// 沙箱工作区
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = normalize(root.as_ref());
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 相对路径解析为工作区内的绝对路径；不在根目录之下则拒绝，且不打开任何文件
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let joined = self.root.join(path);
        let resolved = resolve_symlinks(&normalize(&joined));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            tracing::warn!(path = %path, "path escapes workspace");
            Err(FsError::OutsideWorkspace(path.to_string()))
        }
    }
}

/// 词法归一化：去掉 `.`，`..` 弹出上一段（不越过根）
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// 规范化最长的已存在前缀（解析符号链接），再拼回不存在的尾部
fn resolve_symlinks(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: &[&str], denied: &[&str]) -> CommandPolicy {
        CommandPolicy::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            denied.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_deny_takes_precedence_over_allow() {
        let p = policy(&["rm", "ls"], &["rm"]);
        assert!(p.check("rm -rf /").is_err());
        assert!(p.check("ls -la").is_ok());
    }

    #[test]
    fn test_allow_list_restricts_when_present() {
        let p = policy(&["ls"], &[]);
        assert_eq!(p.check("cat x").unwrap_err(), "Command not allowed: cat");
        assert!(policy(&[], &[]).check("cat x").is_ok());
        assert!(p.check("   ").is_err());
    }

    #[test]
    fn test_parent_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws"));
        std::fs::create_dir_all(ws.root()).unwrap();
        let ws = Workspace::new(ws.root());

        assert!(matches!(ws.resolve("../secret"), Err(FsError::OutsideWorkspace(_))));
        assert!(matches!(ws.resolve("a/../../secret"), Err(FsError::OutsideWorkspace(_))));
        assert!(ws.resolve("a/../b.txt").is_ok());
        assert!(ws.resolve("new/dir/file.txt").unwrap().starts_with(ws.root()));
    }

    #[test]
    fn test_sibling_prefix_is_not_contained() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ws")).unwrap();
        std::fs::create_dir_all(dir.path().join("ws-evil")).unwrap();
        let ws = Workspace::new(dir.path().join("ws"));

        assert!(matches!(ws.resolve("../ws-evil/x"), Err(FsError::OutsideWorkspace(_))));
    }

    #[test]
    fn test_absolute_path_outside_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(matches!(ws.resolve("/etc/passwd"), Err(FsError::OutsideWorkspace(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_workspace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let ws = Workspace::new(dir.path());
        assert!(matches!(ws.resolve("link/file.txt"), Err(FsError::OutsideWorkspace(_))));
    }
}

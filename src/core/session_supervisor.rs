//! 会话监管：每个会话至多一个在跑任务，两级取消
//!
//! - 协作式停止（AtomicBool）：执行器在模型返回后、每个工具调用前检查，命中即静默结束。
//! - 硬取消（CancellationToken）：打断当前挂起点，执行器发布 Error 事件后以 Cancelled 结束。
//!
//! 启动新任务前必须先取消并等待旧任务完全收尾（含清理）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 单个任务的取消信号（可克隆，跨任务共享）
#[derive(Debug, Clone, Default)]
pub struct CancelSignals {
    stop: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CancelSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// 协作式停止：仅置标记
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// 硬取消
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// 正在运行（或刚结束但尚未被回收）的任务
#[derive(Debug)]
pub struct ActiveTask {
    pub task_id: String,
    pub signals: CancelSignals,
    handle: JoinHandle<()>,
}

impl ActiveTask {
    pub fn new(task_id: String, signals: CancelSignals, handle: JoinHandle<()>) -> Self {
        Self {
            task_id,
            signals,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 两级信号都置位，并等待任务（含清理）结束
    pub async fn cancel_and_wait(self) {
        self.signals.request_stop();
        self.signals.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(task_id = %self.task_id, "task panicked during cancellation");
            }
        }
    }
}

/// 会话级任务槽位
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    slot: Mutex<Option<ActiveTask>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 锁住槽位；持锁期间其他启动/中断请求排队
    pub async fn slot(&self) -> MutexGuard<'_, Option<ActiveTask>> {
        self.slot.lock().await
    }

    /// 仅对在跑任务置协作式停止标记
    pub async fn request_stop(&self) -> bool {
        match self.slot.lock().await.as_ref() {
            Some(task) if !task.is_finished() => {
                task.signals.request_stop();
                true
            }
            _ => false,
        }
    }
}

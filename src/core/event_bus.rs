//! 事件总线：按会话有序投递 + 按事件种类扇出
//!
//! 每个会话一条无界队列（首次使用时创建，永不丢弃）；每个种类可挂多个有界订阅队列，
//! 订阅队列满时仅对该订阅者丢弃本事件，已关闭的订阅者在下次发布时移除。
//! 不保证跨会话的全局顺序。总线通过引用（Arc）传给需要发布或订阅的组件，不做全局单例。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use crate::react::{AgentEvent, EventKind};

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

/// 会话队列：读者只在弹出时短暂持锁，等待期间不占用队列
#[derive(Default)]
struct ConversationQueue {
    events: Mutex<VecDeque<AgentEvent>>,
    ready: Notify,
    closed: AtomicBool,
}

impl ConversationQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<AgentEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, event: AgentEvent) {
        self.lock().push_back(event);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<AgentEvent> {
        self.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }
}

pub struct EventBus {
    queues: Mutex<HashMap<String, Arc<ConversationQueue>>>,
    subscribers: Mutex<HashMap<EventKind, Vec<mpsc::Sender<AgentEvent>>>>,
    subscriber_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(subscriber_capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            subscriber_capacity: subscriber_capacity.max(1),
        }
    }

    /// 发布：必进会话队列；按种类复制到订阅队列（尽力而为）
    pub fn publish(&self, event: AgentEvent) {
        let kind = event.kind();
        {
            let mut subs = self.lock_subscribers();
            if let Some(list) = subs.get_mut(&kind) {
                list.retain(|sub| match sub.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(?kind, conversation = %event.conversation_id, "subscriber queue full, event dropped");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }

        self.queue(&event.conversation_id).push(event);
    }

    /// 注册外部队列，接收此后所有会话中该种类的事件
    pub fn subscribe_by_kind(&self, kind: EventKind, queue: mpsc::Sender<AgentEvent>) {
        self.lock_subscribers().entry(kind).or_default().push(queue);
    }

    /// 创建容量为 subscriber_capacity 的订阅队列并注册
    pub fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribe_by_kind(kind, tx);
        rx
    }

    /// 等待该会话的下一条事件（FIFO）；会话队列被移除时返回 None
    pub async fn get_next(&self, conversation_id: &str) -> Option<AgentEvent> {
        let queue = self.queue(conversation_id);
        loop {
            let notified = queue.ready.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过检查与等待之间的 publish
            notified.as_mut().enable();

            if let Some(event) = queue.pop() {
                return Some(event);
            }
            if queue.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// 非阻塞取一条
    pub fn try_next(&self, conversation_id: &str) -> Option<AgentEvent> {
        self.existing_queue(conversation_id)?.pop()
    }

    /// 丢弃该会话当前排队的全部事件，不阻塞；返回丢弃条数
    pub fn drain(&self, conversation_id: &str) -> usize {
        match self.existing_queue(conversation_id) {
            Some(queue) => {
                let mut events = queue.lock();
                let dropped = events.len();
                events.clear();
                dropped
            }
            None => 0,
        }
    }

    /// 移除会话队列（会话销毁时调用），等待中的读者收到 None
    pub fn remove_conversation(&self, conversation_id: &str) {
        if let Some(queue) = self.lock_queues().remove(conversation_id) {
            queue.close();
        }
    }

    fn queue(&self, conversation_id: &str) -> Arc<ConversationQueue> {
        let mut queues = self.lock_queues();
        let queue = queues.entry(conversation_id.to_string()).or_default();
        Arc::clone(queue)
    }

    fn existing_queue(&self, conversation_id: &str) -> Option<Arc<ConversationQueue>> {
        self.lock_queues().get(conversation_id).cloned()
    }

    fn lock_queues(&self) -> MutexGuard<'_, HashMap<String, Arc<ConversationQueue>>> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<mpsc::Sender<AgentEvent>>>> {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(conv: &str, text: &str) -> AgentEvent {
        AgentEvent::error(conv, None, text)
    }

    #[tokio::test]
    async fn test_per_conversation_fifo() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::user_prompt("a", "t1", "one"));
        bus.publish(err("b", "other"));
        bus.publish(err("a", "two"));

        assert_eq!(bus.get_next("a").await.unwrap().kind(), EventKind::UserPrompt);
        assert_eq!(bus.get_next("a").await.unwrap().kind(), EventKind::Error);
        assert!(bus.try_next("a").is_none());
        assert!(bus.try_next("b").is_some());
    }

    #[tokio::test]
    async fn test_get_next_waits_for_publish() {
        let bus = Arc::new(EventBus::default());
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.get_next("c").await })
        };
        tokio::task::yield_now().await;
        bus.publish(err("c", "late"));
        let ev = waiter.await.unwrap().unwrap();
        assert_eq!(ev.conversation_id, "c");
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_but_conversation_queue_keeps_all() {
        let bus = EventBus::default();
        let (tx, mut rx) = mpsc::channel(1);
        bus.subscribe_by_kind(EventKind::Error, tx);

        bus.publish(err("a", "1"));
        bus.publish(err("a", "2"));
        bus.publish(AgentEvent::user_prompt("a", "t", "not subscribed"));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.drain("a"), 3);
        assert_eq!(bus.drain("a"), 0);
    }

    #[tokio::test]
    async fn test_subscription_spans_conversations_and_prunes_closed() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(EventKind::Error);
        let dropped = bus.subscribe(EventKind::Error);
        drop(dropped);

        bus.publish(err("a", "x"));
        bus.publish(err("b", "y"));
        assert_eq!(rx.recv().await.unwrap().conversation_id, "a");
        assert_eq!(rx.recv().await.unwrap().conversation_id, "b");
        assert_eq!(bus.lock_subscribers().get(&EventKind::Error).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_drain_with_parked_reader() {
        let bus = Arc::new(EventBus::default());
        let reader = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.get_next("c").await })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        bus.publish(err("c", "e0"));
        bus.publish(err("c", "e1"));
        bus.publish(err("c", "e2"));
        assert_eq!(bus.drain("c"), 3);
        assert!(bus.try_next("c").is_none());

        bus.publish(err("c", "late"));
        let ev = reader.await.unwrap().unwrap();
        match ev.payload {
            crate::react::EventPayload::Error { error } => assert_eq!(error, "late"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_removed_conversation_wakes_reader() {
        let bus = Arc::new(EventBus::default());
        let reader = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.get_next("gone").await })
        };
        tokio::task::yield_now().await;
        bus.remove_conversation("gone");
        assert!(reader.await.unwrap().is_none());
    }

    #[test]
    fn test_drain_unknown_conversation() {
        let bus = EventBus::default();
        assert_eq!(bus.drain("nope"), 0);
    }
}

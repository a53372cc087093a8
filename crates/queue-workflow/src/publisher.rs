//! 实时视图发布
//!
//! 按科室维护订阅方集合，每个订阅方拥有独立的无界投递队列：
//! 发布方只负责入队，不会被慢速订阅方阻塞，同一订阅方的投递严格按发布顺序。

use crate::view::{DepartmentView, QueueView};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// 订阅句柄ID
pub type SubscriptionId = u64;

/// 订阅过滤条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "patient_id", rename_all = "snake_case")]
pub enum ViewFilter {
    /// 整个科室（医护人员视图）
    Department,
    /// 单个患者
    Patient(String),
}

impl ViewFilter {
    fn project(&self, view: &DepartmentView) -> QueueView {
        match self {
            Self::Department => QueueView::Department(view.clone()),
            Self::Patient(patient_id) => QueueView::Patient(view.for_patient(patient_id)),
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: ViewFilter,
    sender: mpsc::UnboundedSender<QueueView>,
}

#[derive(Debug, Default)]
struct Topic {
    current: Option<DepartmentView>,
    version: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

type Topics = Mutex<HashMap<String, Topic>>;

/// 发布结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 已推送给订阅方
    Delivered { version: u64, subscribers: usize },
    /// 内容未变化，未推送
    Unchanged { version: u64 },
}

/// 视图发布器
#[derive(Debug)]
pub struct ViewPublisher {
    topics: Arc<Topics>,
    next_id: AtomicU64,
}

impl ViewPublisher {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 科室最近一次发布的视图
    pub fn current(&self, department: &str) -> Option<DepartmentView> {
        self.lock()
            .get(department)
            .and_then(|topic| topic.current.clone())
    }

    /// 科室当前订阅数
    pub fn subscriber_count(&self, department: &str) -> usize {
        self.lock()
            .get(department)
            .map(|topic| topic.subscribers.len())
            .unwrap_or(0)
    }

    /// 全部科室的订阅总数
    pub fn total_subscribers(&self) -> usize {
        self.lock().values().map(|topic| topic.subscribers.len()).sum()
    }

    /// 注册订阅，立即投递当前视图；科室尚无视图时投递 `now` 时刻的空视图
    pub fn subscribe(
        &self,
        department: &str,
        filter: ViewFilter,
        now: DateTime<Utc>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut topics = self.lock();
        let topic = topics.entry(department.to_string()).or_default();
        let initial = topic
            .current
            .clone()
            .unwrap_or_else(|| DepartmentView::empty(department, now));

        // 接收端刚创建，入队不会失败
        let _ = sender.send(filter.project(&initial));
        topic.subscribers.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                sender,
            },
        );
        drop(topics);

        tracing::debug!(
            "Subscriber {} registered for department {} ({:?})",
            id,
            department,
            filter
        );

        Subscription {
            id,
            department: department.to_string(),
            filter,
            receiver,
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// 发布新的科室视图
    ///
    /// `force` 为假时，内容与上次发布一致则不推送。版本号由发布器分配。
    pub fn publish(&self, mut view: DepartmentView, force: bool) -> PublishOutcome {
        let mut topics = self.lock();
        let topic = topics.entry(view.department.clone()).or_default();

        if !force {
            if let Some(current) = &topic.current {
                if current.same_content(&view) {
                    return PublishOutcome::Unchanged {
                        version: topic.version,
                    };
                }
            }
        }

        topic.version += 1;
        view.version = topic.version;

        let mut closed = Vec::new();
        for (id, subscriber) in &topic.subscribers {
            if subscriber.sender.send(subscriber.filter.project(&view)).is_err() {
                closed.push(*id);
            }
        }
        for id in &closed {
            topic.subscribers.remove(id);
            tracing::warn!(
                "Dropped closed subscriber {} from department {}",
                id,
                view.department
            );
        }

        let outcome = PublishOutcome::Delivered {
            version: topic.version,
            subscribers: topic.subscribers.len(),
        };
        tracing::debug!(
            "Published view v{} for department {} ({} waiting)",
            topic.version,
            view.department,
            view.entries.len()
        );
        topic.current = Some(view);
        outcome
    }
}

impl Default for ViewPublisher {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_subscriber(topics: &Topics, department: &str, id: SubscriptionId) -> bool {
    let mut topics = topics.lock().unwrap_or_else(|e| e.into_inner());
    let removed = topics
        .get_mut(department)
        .map(|topic| topic.subscribers.remove(&id).is_some())
        .unwrap_or(false);
    if removed {
        tracing::debug!("Subscriber {} left department {}", id, department);
    }
    removed
}

/// 订阅句柄
///
/// 丢弃句柄即注销订阅；注销后不会再收到任何投递。
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    department: String,
    filter: ViewFilter,
    receiver: mpsc::UnboundedReceiver<QueueView>,
    topics: Weak<Topics>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    /// 等待下一次投递，发布器已销毁时返回 `None`
    pub async fn next_view(&mut self) -> Option<QueueView> {
        self.receiver.recv().await
    }

    /// 取出已入队的投递，不等待
    pub fn try_next_view(&mut self) -> Option<QueueView> {
        self.receiver.try_recv().ok()
    }

    /// 显式注销
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(topics) = self.topics.upgrade() {
            remove_subscriber(&topics, &self.department, self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = QueueView;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

//! 存储能力接口

use futures::stream::BoxStream;
use queue_core::{CheckIn, CheckInPatch, CheckInStatus, Result};
use uuid::Uuid;

/// 全量快照流，每次变更后推送过滤后的完整记录集合
pub type SnapshotStream = BoxStream<'static, Result<Vec<CheckIn>>>;

/// 一次原子写入：新建记录与字段更新要么全部生效，要么全部不生效
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub inserts: Vec<CheckIn>,
    pub updates: Vec<(Uuid, CheckInPatch)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: CheckIn) {
        self.inserts.push(record);
    }

    /// 追加字段更新，同一记录的多次更新合并为一条
    pub fn update(&mut self, id: Uuid, patch: CheckInPatch) {
        if let Some(record) = self.inserts.iter_mut().find(|record| record.id == id) {
            record.apply(&patch);
            return;
        }
        match self.updates.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, pending)) => pending.merge(&patch),
            None => self.updates.push((id, patch)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// 候诊记录存储接口
///
/// 查询结果均按 `checked_in_at` 升序返回。存储失败统一映射为
/// `QueueError::StoreUnavailable`。
#[async_trait::async_trait]
pub trait CheckInStore: Send + Sync {
    /// 创建记录
    async fn create(&self, record: CheckIn) -> Result<CheckIn>;

    /// 根据ID读取记录
    async fn get(&self, id: Uuid) -> Result<Option<CheckIn>>;

    /// 更新记录字段，返回更新后的记录
    async fn update(&self, id: Uuid, patch: &CheckInPatch) -> Result<CheckIn>;

    /// 原子写入一批新建与更新；任一条目失败时整批不生效
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// 查询科室内指定状态的记录
    async fn query(&self, department: &str, statuses: &[CheckInStatus]) -> Result<Vec<CheckIn>>;

    /// 订阅科室内指定状态的记录集合，订阅后立即推送一次当前快照
    fn watch(&self, department: &str, status: CheckInStatus) -> SnapshotStream;
}

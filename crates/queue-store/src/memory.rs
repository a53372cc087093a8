//! 内存存储实现
//!
//! 用于单进程部署和测试。每个科室维护一个版本号，写入后递增，
//! 订阅方收到版本变化后读取最新快照。

use crate::store::{CheckInStore, SnapshotStream, WriteBatch};
use futures::StreamExt;
use queue_core::{CheckIn, CheckInPatch, CheckInStatus, QueueError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

/// 内存候诊记录存储
#[derive(Debug, Default)]
pub struct InMemoryCheckInStore {
    records: Arc<RwLock<HashMap<Uuid, CheckIn>>>,
    versions: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl InMemoryCheckInStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录总数
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn with_version<T>(&self, department: &str, f: impl FnOnce(&watch::Sender<u64>) -> T) -> T {
        let mut versions = self.versions.lock().unwrap_or_else(|e| e.into_inner());
        let sender = versions
            .entry(department.to_string())
            .or_insert_with(|| watch::channel(0).0);
        f(sender)
    }

    fn notify(&self, department: &str) {
        self.with_version(department, |sender| sender.send_modify(|version| *version += 1));
        tracing::trace!("Store change recorded for department {}", department);
    }
}

async fn snapshot(
    records: &RwLock<HashMap<Uuid, CheckIn>>,
    department: &str,
    statuses: &[CheckInStatus],
) -> Vec<CheckIn> {
    let records = records.read().await;
    let mut matched: Vec<CheckIn> = records
        .values()
        .filter(|record| record.department == department && statuses.contains(&record.status))
        .cloned()
        .collect();
    matched.sort_by(|a, b| {
        a.checked_in_at
            .cmp(&b.checked_in_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    matched
}

#[async_trait::async_trait]
impl CheckInStore for InMemoryCheckInStore {
    async fn create(&self, record: CheckIn) -> Result<CheckIn> {
        {
            let mut records = self.records.write().await;
            if records.contains_key(&record.id) {
                return Err(QueueError::Internal(format!(
                    "check-in {} already exists",
                    record.id
                )));
            }
            records.insert(record.id, record.clone());
        }
        self.notify(&record.department);
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CheckIn>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: &CheckInPatch) -> Result<CheckIn> {
        let updated = {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(&id)
                .ok_or_else(|| QueueError::NotFound(format!("check-in {}", id)))?;
            record.apply(patch);
            record.clone()
        };
        self.notify(&updated.department);
        Ok(updated)
    }

    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut touched: Vec<String> = Vec::new();
        {
            let mut records = self.records.write().await;
            // 先整体校验，校验通过后才写入
            for (index, record) in batch.inserts.iter().enumerate() {
                let repeated = batch.inserts[..index].iter().any(|r| r.id == record.id);
                if repeated || records.contains_key(&record.id) {
                    return Err(QueueError::Internal(format!(
                        "check-in {} already exists",
                        record.id
                    )));
                }
            }
            if let Some((missing, _)) = batch.updates.iter().find(|(id, _)| {
                !records.contains_key(id) && !batch.inserts.iter().any(|r| r.id == *id)
            }) {
                return Err(QueueError::NotFound(format!("check-in {}", missing)));
            }

            for record in &batch.inserts {
                records.insert(record.id, record.clone());
                if !touched.contains(&record.department) {
                    touched.push(record.department.clone());
                }
            }
            for (id, patch) in &batch.updates {
                if let Some(record) = records.get_mut(id) {
                    record.apply(patch);
                    if !touched.contains(&record.department) {
                        touched.push(record.department.clone());
                    }
                }
            }
        }

        for department in touched {
            self.notify(&department);
        }
        Ok(())
    }

    async fn query(&self, department: &str, statuses: &[CheckInStatus]) -> Result<Vec<CheckIn>> {
        Ok(snapshot(&self.records, department, statuses).await)
    }

    fn watch(&self, department: &str, status: CheckInStatus) -> SnapshotStream {
        let receiver = self.with_version(department, |sender| sender.subscribe());
        let records = self.records.clone();
        let department = department.to_string();

        WatchStream::new(receiver)
            .then(move |_version| {
                let records = records.clone();
                let department = department.clone();
                async move { Ok::<_, QueueError>(snapshot(&records, &department, &[status]).await) }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use queue_core::{AppointmentType, NewCheckIn};

    fn record(department: &str, patient: &str, offset_secs: i64) -> CheckIn {
        CheckIn::new(
            NewCheckIn {
                department: department.to_string(),
                patient_id: patient.to_string(),
                patient_name: format!("Patient {}", patient),
                appointment_type: AppointmentType::WalkIn,
            },
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn test_query_orders_by_arrival() {
        let store = InMemoryCheckInStore::new();
        let late = store.create(record("ent", "P2", 10)).await.unwrap();
        let early = store.create(record("ent", "P1", 0)).await.unwrap();
        store.create(record("eye", "P3", 5)).await.unwrap();

        let waiting = store.query("ent", &[CheckInStatus::Waiting]).await.unwrap();
        let ids: Vec<Uuid> = waiting.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryCheckInStore::new();
        let err = store
            .update(Uuid::new_v4(), &CheckInPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_write_batch_is_all_or_nothing() {
        let store = InMemoryCheckInStore::new();
        let existing = store.create(record("ent", "P1", 0)).await.unwrap();
        let fresh = record("ent", "P2", 5);

        let mut batch = WriteBatch::new();
        batch.insert(fresh.clone());
        batch.update(existing.id, CheckInPatch::placement(Some(1), Some(0)));
        batch.update(Uuid::new_v4(), CheckInPatch::placement(Some(2), Some(10)));
        assert!(store.write_batch(&batch).await.is_err());

        let unchanged = store.get(existing.id).await.unwrap().unwrap();
        assert_eq!(unchanged.queue_position, None);
        assert!(store.get(fresh.id).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_write_batch_inserts_and_updates_together() {
        let store = InMemoryCheckInStore::new();
        let existing = store.create(record("ent", "P1", 0)).await.unwrap();
        let mut stream = store.watch("ent", CheckInStatus::Waiting);
        stream.next().await.unwrap().unwrap();

        let fresh = record("ent", "P2", 5);
        let mut batch = WriteBatch::new();
        batch.insert(fresh.clone());
        batch.update(existing.id, CheckInPatch::placement(Some(2), Some(10)));
        batch.update(fresh.id, CheckInPatch::placement(Some(1), Some(0)));
        store.write_batch(&batch).await.unwrap();

        let moved = store.get(existing.id).await.unwrap().unwrap();
        assert_eq!(moved.queue_position, Some(2));
        let inserted = store.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(inserted.queue_position, Some(1));

        // 整批只产生一次快照
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_watch_emits_current_then_changes() {
        let store = InMemoryCheckInStore::new();
        store.create(record("ent", "P1", 0)).await.unwrap();

        let mut stream = store.watch("ent", CheckInStatus::Waiting);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        let second_record = store.create(record("ent", "P2", 1)).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);

        store
            .update(
                second_record.id,
                &CheckInPatch {
                    status: Some(CheckInStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.len(), 1);
    }
}

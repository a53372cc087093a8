//! 队列引擎
//!
//! 协调存储、排序、状态生命周期和视图发布的核心引擎。
//! 每个变更操作在科室锁内完成“全量重新排序 → 一次原子写入 → 发布”：
//! 变更本身与全部排队位置合并为同一批写入，写入失败时存储和已发布视图均保持原样。
//! 调用方收到成功响应时，订阅方的投递队列中已经有了新视图。

use crate::{
    lifecycle::LifecycleController,
    ordering::{compute_slots, order_waiting, placement_updates, QueueSettings, QueueSlot},
    priority::effective_tier,
    publisher::{PublishOutcome, Subscription, ViewFilter, ViewPublisher},
    registry::{DepartmentRegistry, DepartmentState},
    view::{build_department_view, DepartmentView},
};
use futures::StreamExt;
use queue_core::utils::normalize_department;
use queue_core::{
    CheckIn, CheckInPatch, CheckInStatus, Clock, NewCheckIn, PriorityTier, QueueError, Result,
    SystemClock,
};
use queue_store::{CheckInStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ACTIVE: [CheckInStatus; 2] = [CheckInStatus::Waiting, CheckInStatus::InProgress];
const TERMINAL: [CheckInStatus; 2] = [CheckInStatus::Completed, CheckInStatus::Cancelled];

/// 一次重新排序的结果
#[derive(Debug, Clone)]
pub struct Recomputed {
    pub slots: Vec<QueueSlot>,
    pub outcome: PublishOutcome,
}

impl Recomputed {
    fn apply_to(&self, record: &mut CheckIn) {
        match self.slots.iter().find(|slot| slot.id == record.id) {
            Some(slot) => {
                record.queue_position = Some(slot.position);
                record.estimated_wait_minutes = Some(slot.estimated_wait_minutes);
            }
            None => {
                record.queue_position = None;
                record.estimated_wait_minutes = None;
            }
        }
    }
}

/// 科室队列统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub department: String,
    pub waiting: usize,
    pub waiting_by_tier: BTreeMap<PriorityTier, usize>,
    pub consult_active: bool,
    pub now_serving: Option<Uuid>,
    pub longest_estimated_wait_minutes: Option<u32>,
    pub completed: usize,
    pub cancelled: usize,
    pub average_service_minutes: u32,
}

/// 队列引擎
pub struct QueueEngine {
    store: Arc<dyn CheckInStore>,
    settings: QueueSettings,
    clock: Arc<dyn Clock>,
    lifecycle: LifecycleController,
    publisher: ViewPublisher,
    departments: DepartmentRegistry,
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("settings", &self.settings)
            .field("departments", &self.departments.departments())
            .finish()
    }
}

impl QueueEngine {
    /// 创建新的队列引擎
    pub fn new(store: Arc<dyn CheckInStore>, settings: QueueSettings) -> Self {
        Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
            lifecycle: LifecycleController::new(),
            publisher: ViewPublisher::new(),
            departments: DepartmentRegistry::new(),
        }
    }

    /// 替换时间来源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn publisher(&self) -> &ViewPublisher {
        &self.publisher
    }

    pub fn departments(&self) -> &DepartmentRegistry {
        &self.departments
    }

    /// 患者登记候诊
    pub async fn check_in(&self, request: NewCheckIn) -> Result<CheckIn> {
        let request = validate_request(request)?;
        let slot = self.departments.slot(&request.department);
        let mut state = slot.lock().await;

        let active = self.store.query(&request.department, &ACTIVE).await?;
        if let Some(existing) = active.iter().find(|r| r.patient_id == request.patient_id) {
            warn!(
                "Patient {} already has active check-in {} in {}",
                request.patient_id, existing.id, request.department
            );
            return Err(QueueError::Conflict {
                department: request.department,
                active: existing.id.to_string(),
            });
        }

        let mut record = CheckIn::new(request, self.clock.now());
        let mut batch = WriteBatch::new();
        batch.insert(record.clone());

        let mut records = active;
        records.push(record.clone());
        let recomputed = self
            .commit(&record.department, &mut state, records, batch, true)
            .await?;
        recomputed.apply_to(&mut record);

        info!(
            "Checked in {} ({}) to {} as {:?} at position {:?}",
            record.patient_id,
            record.id,
            record.department,
            effective_tier(&record),
            record.queue_position
        );
        Ok(record)
    }

    /// 更新候诊状态
    pub async fn update_status(&self, id: Uuid, target: CheckInStatus) -> Result<CheckIn> {
        let department = self.get(id).await?.department;
        let slot = self.departments.slot(&department);
        let mut state = slot.lock().await;

        // 锁内重新读取，保证基于最新状态校验
        let record = self.get(id).await?;
        let active = self.store.query(&department, &ACTIVE).await?;
        let patch = match self.lifecycle.plan(&record, target, &active, self.clock.now()) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("Rejected transition of {} to {}: {}", id, target, e);
                return Err(e);
            }
        };

        let updated = self
            .commit_patch(&department, &mut state, active, &record, patch)
            .await?;

        info!(
            "Check-in {} in {} moved from {} to {}",
            id, department, record.status, updated.status
        );
        Ok(updated)
    }

    /// 人工修正优先级，`None` 表示恢复按预约类型分级
    pub async fn correct_priority(&self, id: Uuid, tier: Option<PriorityTier>) -> Result<CheckIn> {
        let department = self.get(id).await?.department;
        let slot = self.departments.slot(&department);
        let mut state = slot.lock().await;

        let record = self.get(id).await?;
        if record.status != CheckInStatus::Waiting {
            return Err(QueueError::NotFound(format!(
                "check-in {} is not in the active queue",
                id
            )));
        }
        let active = self.store.query(&department, &ACTIVE).await?;

        let patch = CheckInPatch {
            priority_override: Some(tier),
            ..Default::default()
        };
        let updated = self
            .commit_patch(&department, &mut state, active, &record, patch)
            .await?;

        info!(
            "Priority of {} in {} corrected to {:?}",
            id,
            department,
            effective_tier(&updated)
        );
        Ok(updated)
    }

    /// 订阅科室视图，注册后立即收到当前视图
    pub async fn subscribe(&self, department: &str, filter: ViewFilter) -> Result<Subscription> {
        let department = department_key(department)?;
        let filter = match filter {
            ViewFilter::Patient(patient_id) => ViewFilter::Patient(patient_id.trim().to_string()),
            other => other,
        };
        let slot = self.departments.slot(&department);
        let mut state = slot.lock().await;

        if self.publisher.current(&department).is_none() {
            self.resync(&department, &mut state).await?;
        }
        Ok(self
            .publisher
            .subscribe(&department, filter, self.clock.now()))
    }

    /// 获取科室当前视图
    pub async fn current_view(&self, department: &str) -> Result<DepartmentView> {
        let department = department_key(department)?;
        if let Some(view) = self.publisher.current(&department) {
            return Ok(view);
        }

        let slot = self.departments.slot(&department);
        let mut state = slot.lock().await;
        if self.publisher.current(&department).is_none() {
            self.resync(&department, &mut state).await?;
        }
        Ok(self
            .publisher
            .current(&department)
            .unwrap_or_else(|| DepartmentView::empty(&department, self.clock.now())))
    }

    /// 从存储重新同步科室队列，内容无变化时不推送
    pub async fn refresh(&self, department: &str) -> Result<PublishOutcome> {
        let department = department_key(department)?;
        let slot = self.departments.slot(&department);
        let mut state = slot.lock().await;
        Ok(self.resync(&department, &mut state).await?.outcome)
    }

    /// 挂接存储订阅，其他写入方修改存储后自动重新同步
    ///
    /// 同一科室只挂接一次，重复调用返回 `None`。
    pub async fn watch_department(self: &Arc<Self>, department: &str) -> Result<Option<JoinHandle<()>>> {
        let department = department_key(department)?;
        {
            let slot = self.departments.slot(&department);
            let mut state = slot.lock().await;
            if state.watching {
                return Ok(None);
            }
            state.watching = true;
        }

        let mut snapshots = self.store.watch(&department, CheckInStatus::Waiting);
        let engine = Arc::downgrade(self);
        info!("Attached store watch for department {}", department);

        Ok(Some(tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match snapshot {
                    Ok(records) => {
                        debug!(
                            "Store reported {} waiting records for {}",
                            records.len(),
                            department
                        );
                        if let Err(e) = engine.refresh(&department).await {
                            warn!("Resync of department {} failed: {}", department, e);
                        }
                    }
                    Err(e) => warn!("Store watch error for department {}: {}", department, e),
                }
            }

            if let Some(engine) = engine.upgrade() {
                let slot = engine.departments.slot(&department);
                slot.lock().await.watching = false;
            }
            debug!("Store watch ended for department {}", department);
        })))
    }

    /// 根据ID读取记录
    pub async fn get(&self, id: Uuid) -> Result<CheckIn> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("check-in {}", id)))
    }

    /// 查找患者在科室内的活跃记录
    pub async fn find_active_for_patient(
        &self,
        department: &str,
        patient_id: &str,
    ) -> Result<Option<CheckIn>> {
        let department = department_key(department)?;
        let active = self.store.query(&department, &ACTIVE).await?;
        Ok(active.into_iter().find(|r| r.patient_id == patient_id))
    }

    /// 科室历史记录（已完成与已取消），按结束时间倒序
    pub async fn history(&self, department: &str, limit: usize) -> Result<Vec<CheckIn>> {
        let department = department_key(department)?;
        let mut records = self.store.query(&department, &TERMINAL).await?;
        records.sort_by(|a, b| {
            let closed_a = a.completed_at.or(a.cancelled_at);
            let closed_b = b.completed_at.or(b.cancelled_at);
            closed_b.cmp(&closed_a)
        });
        records.truncate(limit);
        Ok(records)
    }

    /// 科室队列统计
    pub async fn stats(&self, department: &str) -> Result<QueueStats> {
        let department = department_key(department)?;
        let records = self
            .store
            .query(
                &department,
                &[
                    CheckInStatus::Waiting,
                    CheckInStatus::InProgress,
                    CheckInStatus::Completed,
                    CheckInStatus::Cancelled,
                ],
            )
            .await?;

        let profile = self.settings.profile_for(&department);
        let active = records.iter().find(|r| r.status == CheckInStatus::InProgress);
        let slots = compute_slots(&records, active, profile, self.clock.now());

        let mut waiting_by_tier = BTreeMap::new();
        for slot in &slots {
            *waiting_by_tier.entry(slot.tier).or_insert(0) += 1;
        }

        Ok(QueueStats {
            department,
            waiting: slots.len(),
            waiting_by_tier,
            consult_active: active.is_some(),
            now_serving: active.map(|r| r.id),
            longest_estimated_wait_minutes: slots.iter().map(|s| s.estimated_wait_minutes).max(),
            completed: records
                .iter()
                .filter(|r| r.status == CheckInStatus::Completed)
                .count(),
            cancelled: records
                .iter()
                .filter(|r| r.status == CheckInStatus::Cancelled)
                .count(),
            average_service_minutes: profile.average_service_minutes,
        })
    }

    /// 对单条记录应用更新并提交，返回更新后的记录
    async fn commit_patch(
        &self,
        department: &str,
        state: &mut DepartmentState,
        mut records: Vec<CheckIn>,
        record: &CheckIn,
        patch: CheckInPatch,
    ) -> Result<CheckIn> {
        let mut updated = record.clone();
        updated.apply(&patch);
        if let Some(pending) = records.iter_mut().find(|r| r.id == record.id) {
            pending.apply(&patch);
        }

        let mut batch = WriteBatch::new();
        batch.update(record.id, patch);
        let recomputed = self.commit(department, state, records, batch, true).await?;
        recomputed.apply_to(&mut updated);
        Ok(updated)
    }

    /// 从存储读取活跃记录并重新排序，内容无变化时不推送
    async fn resync(&self, department: &str, state: &mut DepartmentState) -> Result<Recomputed> {
        let records = self.store.query(department, &ACTIVE).await?;
        self.commit(department, state, records, WriteBatch::new(), false).await
    }

    /// 全量重新排序，与待写入的变更合并为一次原子写入后发布
    ///
    /// `records` 为已应用本次变更的科室活跃记录。调用方必须持有科室锁；
    /// 写入失败时直接返回错误，不发布任何视图。
    async fn commit(
        &self,
        department: &str,
        _state: &mut DepartmentState,
        mut records: Vec<CheckIn>,
        mut batch: WriteBatch,
        force: bool,
    ) -> Result<Recomputed> {
        let now = self.clock.now();
        let profile = self.settings.profile_for(department);
        let (slots, placements) = {
            let active = now_serving(&records);
            let slots = compute_slots(&records, active, profile, now);
            let placements = placement_updates(&records, &slots);
            (slots, placements)
        };

        let written = placements.len();
        for (id, patch) in placements {
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                record.apply(&patch);
            }
            batch.update(id, patch);
        }
        if !batch.is_empty() {
            self.store.write_batch(&batch).await?;
        }

        let ordered = order_waiting(&records);
        let view = build_department_view(department, &ordered, &slots, now_serving(&records), now);
        let outcome = self.publisher.publish(view, force);

        debug!(
            "Recomputed {}: {} waiting, {} placements written, {:?}",
            department,
            slots.len(),
            written,
            outcome
        );

        Ok(Recomputed { slots, outcome })
    }
}

/// 当前就诊中的记录，多条时取最早开始的一条
fn now_serving(records: &[CheckIn]) -> Option<&CheckIn> {
    records
        .iter()
        .filter(|r| r.status == CheckInStatus::InProgress)
        .min_by_key(|r| r.started_at)
}

fn department_key(department: &str) -> Result<String> {
    let key = normalize_department(department);
    if key.is_empty() {
        return Err(QueueError::Validation("department is required".to_string()));
    }
    Ok(key)
}

fn validate_request(mut request: NewCheckIn) -> Result<NewCheckIn> {
    request.department = department_key(&request.department)?;
    request.patient_id = request.patient_id.trim().to_string();
    request.patient_name = request.patient_name.trim().to_string();

    if request.patient_id.is_empty() {
        return Err(QueueError::Validation("patient_id is required".to_string()));
    }
    if request.patient_name.is_empty() {
        return Err(QueueError::Validation("patient_name is required".to_string()));
    }
    Ok(request)
}

//! 队列排序引擎
//!
//! 对科室内全部候诊记录给出确定的全序，并推导排队位置和预计等待时间。
//! 排序规则：优先级分层 → 登记时间 → 记录ID。

use crate::priority::effective_tier;
use chrono::{DateTime, Utc};
use queue_core::{CheckIn, CheckInPatch, CheckInStatus, PriorityTier};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// 等待时间估算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitEstimator {
    /// 平均就诊时长 × (位置 - 1)
    #[default]
    Flat,
    /// 在固定估算上叠加当前就诊患者的剩余时长
    IncludeActiveRemaining,
}

/// 科室服务参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub average_service_minutes: u32,
    pub estimator: WaitEstimator,
}

impl Default for ServiceProfile {
    fn default() -> Self {
        Self {
            average_service_minutes: 15,
            estimator: WaitEstimator::Flat,
        }
    }
}

/// 队列参数，可按科室覆盖默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub default_profile: ServiceProfile,
    pub departments: HashMap<String, ServiceProfile>,
}

impl QueueSettings {
    pub fn with_department(mut self, department: &str, profile: ServiceProfile) -> Self {
        self.departments
            .insert(queue_core::utils::normalize_department(department), profile);
        self
    }

    /// 获取科室的服务参数
    pub fn profile_for(&self, department: &str) -> &ServiceProfile {
        self.departments
            .get(department)
            .unwrap_or(&self.default_profile)
    }
}

/// 单条候诊记录的排队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlot {
    pub id: Uuid,
    pub tier: PriorityTier,
    pub position: u32,
    pub estimated_wait_minutes: u32,
}

/// 候诊顺序比较
pub fn queue_order(a: &CheckIn, b: &CheckIn) -> Ordering {
    effective_tier(a)
        .cmp(&effective_tier(b))
        .then_with(|| a.checked_in_at.cmp(&b.checked_in_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// 对候诊记录排序，非候诊状态的记录被忽略
pub fn order_waiting(records: &[CheckIn]) -> Vec<&CheckIn> {
    let mut waiting: Vec<&CheckIn> = records
        .iter()
        .filter(|record| record.status == CheckInStatus::Waiting)
        .collect();
    waiting.sort_by(|a, b| queue_order(a, b));
    waiting
}

/// 当前就诊患者的剩余时长（分钟）
fn active_remaining_minutes(
    active: Option<&CheckIn>,
    profile: &ServiceProfile,
    now: DateTime<Utc>,
) -> u32 {
    let Some(active) = active else {
        return 0;
    };
    let elapsed = active
        .started_at
        .map(|started| (now - started).num_minutes().max(0))
        .unwrap_or(0);
    let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
    profile.average_service_minutes.saturating_sub(elapsed)
}

/// 计算整个科室候诊集合的排队位置和预计等待时间
///
/// 估算值随位置单调不减：每个位置共享同一个偏移量，再加上随位置线性增长的部分。
pub fn compute_slots(
    records: &[CheckIn],
    active: Option<&CheckIn>,
    profile: &ServiceProfile,
    now: DateTime<Utc>,
) -> Vec<QueueSlot> {
    let offset = match profile.estimator {
        WaitEstimator::Flat => 0,
        WaitEstimator::IncludeActiveRemaining => active_remaining_minutes(active, profile, now),
    };

    order_waiting(records)
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let ahead = index as u32;
            QueueSlot {
                id: record.id,
                tier: effective_tier(record),
                position: ahead + 1,
                estimated_wait_minutes: offset
                    .saturating_add(profile.average_service_minutes.saturating_mul(ahead)),
            }
        })
        .collect()
}

/// 生成需要写回存储的位置更新，只包含发生变化的记录
pub fn placement_updates(records: &[CheckIn], slots: &[QueueSlot]) -> Vec<(Uuid, CheckInPatch)> {
    let by_id: HashMap<Uuid, &QueueSlot> = slots.iter().map(|slot| (slot.id, slot)).collect();

    records
        .iter()
        .filter_map(|record| {
            let (position, wait) = match by_id.get(&record.id) {
                Some(slot) => (Some(slot.position), Some(slot.estimated_wait_minutes)),
                None => (None, None),
            };
            if record.queue_position == position && record.estimated_wait_minutes == wait {
                None
            } else {
                Some((record.id, CheckInPatch::placement(position, wait)))
            }
        })
        .collect()
}

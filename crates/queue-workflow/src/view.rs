//! 队列物化视图
//!
//! 推送给订阅方的科室队列快照，以及按患者过滤后的视图。

use crate::ordering::QueueSlot;
use crate::priority::effective_tier;
use chrono::{DateTime, Utc};
use queue_core::{CheckIn, CheckInStatus, PriorityTier};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 视图中的单条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub id: Uuid,
    pub patient_id: String,
    pub patient_name: String,
    pub tier: PriorityTier,
    pub position: Option<u32>,
    pub estimated_wait_minutes: Option<u32>,
    pub status: CheckInStatus,
}

impl ViewEntry {
    pub fn from_record(record: &CheckIn, slot: Option<&QueueSlot>) -> Self {
        Self {
            id: record.id,
            patient_id: record.patient_id.clone(),
            patient_name: record.patient_name.clone(),
            tier: effective_tier(record),
            position: slot.map(|s| s.position),
            estimated_wait_minutes: slot.map(|s| s.estimated_wait_minutes),
            status: record.status,
        }
    }
}

/// 科室队列视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentView {
    pub department: String,
    /// 每次发布递增
    pub version: u64,
    pub now_serving: Option<ViewEntry>,
    /// 按排队位置升序
    pub entries: Vec<ViewEntry>,
    pub generated_at: DateTime<Utc>,
}

impl DepartmentView {
    /// 空队列视图
    pub fn empty(department: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            department: department.to_string(),
            version: 0,
            now_serving: None,
            entries: Vec::new(),
            generated_at,
        }
    }

    /// 内容是否一致（忽略版本号与生成时间）
    pub fn same_content(&self, other: &DepartmentView) -> bool {
        self.department == other.department
            && self.now_serving == other.now_serving
            && self.entries == other.entries
    }

    pub fn waiting_count(&self) -> usize {
        self.entries.len()
    }

    /// 查找患者的候诊记录
    pub fn entry_for_patient(&self, patient_id: &str) -> Option<&ViewEntry> {
        self.entries.iter().find(|entry| entry.patient_id == patient_id)
    }

    /// 按患者过滤
    pub fn for_patient(&self, patient_id: &str) -> PatientView {
        match self.entry_for_patient(patient_id) {
            Some(entry) => PatientView::Waiting {
                department: self.department.clone(),
                version: self.version,
                entry: entry.clone(),
                queue_length: self.entries.len(),
            },
            None => PatientView::NotInQueue {
                department: self.department.clone(),
                version: self.version,
                patient_id: patient_id.to_string(),
            },
        }
    }
}

/// 患者视图：只关心本人是否仍在候诊集合中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PatientView {
    NotInQueue {
        department: String,
        version: u64,
        patient_id: String,
    },
    Waiting {
        department: String,
        version: u64,
        entry: ViewEntry,
        queue_length: usize,
    },
}

impl PatientView {
    pub fn is_in_queue(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::NotInQueue { version, .. } | Self::Waiting { version, .. } => *version,
        }
    }
}

/// 推送给订阅方的视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "view", rename_all = "snake_case")]
pub enum QueueView {
    Department(DepartmentView),
    Patient(PatientView),
}

impl QueueView {
    pub fn version(&self) -> u64 {
        match self {
            Self::Department(view) => view.version,
            Self::Patient(view) => view.version(),
        }
    }
}

/// 构建科室视图，`ordered` 必须已按队列顺序排列且与 `slots` 一一对应
pub fn build_department_view(
    department: &str,
    ordered: &[&CheckIn],
    slots: &[QueueSlot],
    active: Option<&CheckIn>,
    generated_at: DateTime<Utc>,
) -> DepartmentView {
    let entries = ordered
        .iter()
        .zip(slots.iter())
        .map(|(record, slot)| ViewEntry::from_record(record, Some(slot)))
        .collect();

    DepartmentView {
        department: department.to_string(),
        version: 0,
        now_serving: active.map(|record| ViewEntry::from_record(record, None)),
        entries,
        generated_at,
    }
}

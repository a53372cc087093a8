//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::QueueError;

/// 预约类型
///
/// 无法识别的类型保留原始字符串，排序时归入最低优先级。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppointmentType {
    Emergency,            // 急诊
    ScheduledAppointment, // 预约就诊
    FollowUp,             // 复诊
    WalkIn,               // 现场挂号
    Other(String),        // 未知类型
}

impl AppointmentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Emergency => "emergency",
            Self::ScheduledAppointment => "scheduled_appointment",
            Self::FollowUp => "follow_up",
            Self::WalkIn => "walk_in",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for AppointmentType {
    fn from(value: &str) -> Self {
        let compact: String = value
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match compact.as_str() {
            "emergency" => Self::Emergency,
            "scheduledappointment" | "scheduled" => Self::ScheduledAppointment,
            "followup" => Self::FollowUp,
            "walkin" => Self::WalkIn,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl From<String> for AppointmentType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<AppointmentType> for String {
    fn from(value: AppointmentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 优先级分层，按紧急程度升序排列（数值越小越优先）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Emergency,
    Scheduled,
    FollowUp,
    WalkIn,
    Unclassified,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Scheduled => "scheduled",
            Self::FollowUp => "follow_up",
            Self::WalkIn => "walk_in",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 候诊状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckInStatus {
    Waiting,    // 候诊中
    InProgress, // 就诊中
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 候诊或就诊中
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "waiting" => Ok(Self::Waiting),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(QueueError::Validation(format!("unknown status: {}", other))),
        }
    }
}

/// 候诊登记记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub patient_id: String,
    pub patient_name: String,
    pub department: String,
    pub appointment_type: AppointmentType,
    pub checked_in_at: DateTime<Utc>,
    pub status: CheckInStatus,
    pub priority_override: Option<PriorityTier>, // 人工修正的优先级
    pub queue_position: Option<u32>,             // 仅候诊中记录有值
    pub estimated_wait_minutes: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl CheckIn {
    /// 创建新的候诊记录，初始状态为候诊中
    pub fn new(request: NewCheckIn, checked_in_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            patient_name: request.patient_name,
            department: request.department,
            appointment_type: request.appointment_type,
            checked_in_at,
            status: CheckInStatus::Waiting,
            priority_override: None,
            queue_position: None,
            estimated_wait_minutes: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// 应用字段更新
    pub fn apply(&mut self, patch: &CheckInPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority_override) = patch.priority_override {
            self.priority_override = priority_override;
        }
        if let Some(queue_position) = patch.queue_position {
            self.queue_position = queue_position;
        }
        if let Some(estimated_wait) = patch.estimated_wait_minutes {
            self.estimated_wait_minutes = estimated_wait;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(cancelled_at) = patch.cancelled_at {
            self.cancelled_at = Some(cancelled_at);
        }
    }
}

/// 新登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCheckIn {
    pub department: String,
    pub patient_id: String,
    pub patient_name: String,
    pub appointment_type: AppointmentType,
}

/// 记录字段更新
///
/// 外层 `None` 表示不修改该字段；可清空的字段使用 `Some(None)`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckInPatch {
    pub status: Option<CheckInStatus>,
    pub priority_override: Option<Option<PriorityTier>>,
    pub queue_position: Option<Option<u32>>,
    pub estimated_wait_minutes: Option<Option<u32>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl CheckInPatch {
    /// 排队位置与预计等待时间的更新
    pub fn placement(position: Option<u32>, estimated_wait: Option<u32>) -> Self {
        Self {
            queue_position: Some(position),
            estimated_wait_minutes: Some(estimated_wait),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// 合并另一份更新，`other` 中设置的字段覆盖当前值
    pub fn merge(&mut self, other: &CheckInPatch) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.priority_override.is_some() {
            self.priority_override = other.priority_override;
        }
        if other.queue_position.is_some() {
            self.queue_position = other.queue_position;
        }
        if other.estimated_wait_minutes.is_some() {
            self.estimated_wait_minutes = other.estimated_wait_minutes;
        }
        if other.started_at.is_some() {
            self.started_at = other.started_at;
        }
        if other.completed_at.is_some() {
            self.completed_at = other.completed_at;
        }
        if other.cancelled_at.is_some() {
            self.cancelled_at = other.cancelled_at;
        }
    }
}

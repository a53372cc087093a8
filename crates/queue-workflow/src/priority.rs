//! 优先级分类
//!
//! 将预约类型映射为固定的优先级分层。

use queue_core::{AppointmentType, CheckIn, PriorityTier};

/// 根据预约类型确定优先级分层
pub fn classify(appointment_type: &AppointmentType) -> PriorityTier {
    match appointment_type {
        AppointmentType::Emergency => PriorityTier::Emergency,
        AppointmentType::ScheduledAppointment => PriorityTier::Scheduled,
        AppointmentType::FollowUp => PriorityTier::FollowUp,
        AppointmentType::WalkIn => PriorityTier::WalkIn,
        AppointmentType::Other(_) => PriorityTier::Unclassified,
    }
}

/// 记录当前生效的优先级：人工修正优先于预约类型
pub fn effective_tier(record: &CheckIn) -> PriorityTier {
    record
        .priority_override
        .unwrap_or_else(|| classify(&record.appointment_type))
}

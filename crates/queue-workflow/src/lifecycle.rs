//! 状态生命周期控制
//!
//! 在状态机之上增加科室级约束：同一科室同一时间最多一名就诊中的患者。
//! 控制器只负责校验并生成字段更新，写入和重新排序由引擎在科室锁内完成。

use crate::state_machine::{CheckInStateMachine, QueueEvent};
use chrono::{DateTime, Utc};
use queue_core::{CheckIn, CheckInPatch, CheckInStatus, QueueError, Result};

/// 生命周期控制器
#[derive(Debug, Default)]
pub struct LifecycleController {
    state_machine: CheckInStateMachine,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验状态转换并生成字段更新
    ///
    /// `department_records` 为同一科室当前的活跃记录（候诊中与就诊中）。
    pub fn plan(
        &self,
        record: &CheckIn,
        target: CheckInStatus,
        department_records: &[CheckIn],
        now: DateTime<Utc>,
    ) -> Result<CheckInPatch> {
        let event = self.state_machine.resolve(record.status, target)?;

        if event == QueueEvent::Called {
            if let Some(active) = department_records
                .iter()
                .find(|other| other.status == CheckInStatus::InProgress && other.id != record.id)
            {
                return Err(QueueError::Conflict {
                    department: record.department.clone(),
                    active: active.id.to_string(),
                });
            }
        }

        let mut patch = CheckInPatch {
            status: Some(target),
            ..Default::default()
        };

        // 离开候诊集合后不再持有排队位置
        if record.status == CheckInStatus::Waiting {
            patch.queue_position = Some(None);
            patch.estimated_wait_minutes = Some(None);
        }

        match event {
            QueueEvent::Called => patch.started_at = Some(now),
            QueueEvent::Completed => patch.completed_at = Some(now),
            QueueEvent::Cancelled => patch.cancelled_at = Some(now),
        }

        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{AppointmentType, ErrorKind, NewCheckIn};

    fn record(department: &str, status: CheckInStatus) -> CheckIn {
        let mut record = CheckIn::new(
            NewCheckIn {
                department: department.to_string(),
                patient_id: uuid::Uuid::new_v4().to_string(),
                patient_name: "Dee".to_string(),
                appointment_type: AppointmentType::ScheduledAppointment,
            },
            Utc::now(),
        );
        record.status = status;
        record
    }

    #[test]
    fn test_call_sets_started_and_clears_position() {
        let controller = LifecycleController::new();
        let mut waiting = record("ent", CheckInStatus::Waiting);
        waiting.queue_position = Some(1);
        let now = Utc::now();

        let patch = controller
            .plan(&waiting, CheckInStatus::InProgress, &[waiting.clone()], now)
            .unwrap();
        assert_eq!(patch.status, Some(CheckInStatus::InProgress));
        assert_eq!(patch.started_at, Some(now));
        assert_eq!(patch.queue_position, Some(None));
        assert_eq!(patch.completed_at, None);
    }

    #[test]
    fn test_single_active_consult() {
        let controller = LifecycleController::new();
        let serving = record("ent", CheckInStatus::InProgress);
        let next = record("ent", CheckInStatus::Waiting);

        let err = controller
            .plan(
                &next,
                CheckInStatus::InProgress,
                &[serving.clone(), next.clone()],
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_terminal_timestamps() {
        let controller = LifecycleController::new();
        let serving = record("ent", CheckInStatus::InProgress);
        let now = Utc::now();

        let patch = controller
            .plan(&serving, CheckInStatus::Completed, &[], now)
            .unwrap();
        assert_eq!(patch.completed_at, Some(now));
        assert_eq!(patch.cancelled_at, None);
        assert_eq!(patch.queue_position, None);

        let waiting = record("ent", CheckInStatus::Waiting);
        let patch = controller
            .plan(&waiting, CheckInStatus::Cancelled, &[], now)
            .unwrap();
        assert_eq!(patch.cancelled_at, Some(now));
        assert_eq!(patch.completed_at, None);
    }

    #[test]
    fn test_rejections_are_stable() {
        let controller = LifecycleController::new();
        let done = record("ent", CheckInStatus::Completed);

        for _ in 0..3 {
            let err = controller
                .plan(&done, CheckInStatus::Completed, &[], Utc::now())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        }

        // 终态记录即使科室空闲也不能重新叫号
        let err = controller
            .plan(&done, CheckInStatus::InProgress, &[], Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}

//! 候诊状态机
//!
//! 管理候诊记录的完整生命周期状态转换

use queue_core::{CheckInStatus, QueueError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    Called,    // 叫号就诊
    Completed, // 就诊结束
    Cancelled, // 取消
}

/// 候诊状态机
#[derive(Debug)]
pub struct CheckInStateMachine {
    transitions: HashMap<(CheckInStatus, QueueEvent), CheckInStatus>,
}

impl CheckInStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert((CheckInStatus::Waiting, QueueEvent::Called), CheckInStatus::InProgress);
        transitions.insert((CheckInStatus::InProgress, QueueEvent::Completed), CheckInStatus::Completed);
        transitions.insert((CheckInStatus::Waiting, QueueEvent::Cancelled), CheckInStatus::Cancelled);
        transitions.insert((CheckInStatus::InProgress, QueueEvent::Cancelled), CheckInStatus::Cancelled);

        Self { transitions }
    }

    /// 根据目标状态找到对应事件
    pub fn resolve(&self, from: CheckInStatus, to: CheckInStatus) -> Result<QueueEvent> {
        self.transitions
            .iter()
            .find(|((state, _), target)| *state == from && **target == to)
            .map(|((_, event), _)| *event)
            .ok_or_else(|| QueueError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

impl Default for CheckInStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

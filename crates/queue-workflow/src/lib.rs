//! # 候诊队列工作流模块
//!
//! 提供科室候诊队列的核心处理功能，包括：
//! - 优先级分级：根据预约类型确定候诊等级
//! - 排序与等待估算：对候诊集合全量重新排序
//! - 状态机：管理候诊记录的生命周期与单科室单就诊约束
//! - 实时视图：向医护人员和患者推送队列视图

pub mod engine;
pub mod lifecycle;
pub mod ordering;
pub mod priority;
pub mod publisher;
pub mod registry;
pub mod state_machine;
pub mod view;

// 重新导出主要类型
pub use engine::{QueueEngine, QueueStats, Recomputed};
pub use lifecycle::LifecycleController;
pub use ordering::{QueueSettings, QueueSlot, ServiceProfile, WaitEstimator};
pub use priority::{classify, effective_tier};
pub use publisher::{PublishOutcome, Subscription, SubscriptionId, ViewFilter, ViewPublisher};
pub use registry::{DepartmentRegistry, DepartmentState};
pub use state_machine::{CheckInStateMachine, QueueEvent};
pub use view::{DepartmentView, PatientView, QueueView, ViewEntry};

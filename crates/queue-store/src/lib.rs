//! # 候诊记录存储模块
//!
//! 队列引擎的外部协作者：持久化候诊记录并提供按科室、状态过滤的实时订阅。
//! 引擎只依赖 [`CheckInStore`] 能力接口，任何支持变更通知或定期轮询的存储均可接入。

pub mod memory;
pub mod polling;
pub mod store;

// 重新导出主要类型
pub use memory::InMemoryCheckInStore;
pub use polling::poll_snapshots;
pub use store::{CheckInStore, SnapshotStream, WriteBatch};
